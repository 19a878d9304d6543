//! Graph-consistency errors shared across the core algorithms.

use thiserror::Error;

use crate::model::NodeId;

/// Errors raised when a feature graph is structurally inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A link or lookup referred to a node outside the arena.
    #[error("node {id} does not exist in this graph")]
    DanglingNode {
        /// Identifier that could not be resolved.
        id: NodeId,
    },
    /// A node was found but holds a different variant than required.
    #[error("node {id} is a {actual}, expected a {expected}")]
    UnexpectedKind {
        /// Offending node.
        id: NodeId,
        /// Variant the caller required.
        expected: &'static str,
        /// Variant actually stored.
        actual: &'static str,
    },
    /// An owning link leads back to a node that is still being written.
    #[error("node {id} is owned by one of its own descendants")]
    Cycle {
        /// Node reached twice.
        id: NodeId,
    },
    /// The graph has no root node.
    #[error("feature graph has no root")]
    MissingRoot,
    /// A surface target required a geometry database id that was never assigned.
    #[error("surface {surface} targeted by surface data {object_id} has no geometry database id")]
    MissingDatabaseId {
        /// Object id of the surface data holding the mapping.
        object_id: String,
        /// Object id of the targeted surface.
        surface: String,
    },
    /// A feature type string was not of the form `namespace:name`.
    #[error("invalid feature type {0:?}; expected `namespace:name`")]
    InvalidFeatureType(String),
    /// A level-of-detail tag could not be parsed or was out of range.
    #[error("invalid level of detail {0:?}; expected lod0 to lod4")]
    InvalidLod(String),
}
