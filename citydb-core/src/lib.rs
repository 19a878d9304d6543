//! Core domain types and database-independent algorithms for the city-model
//! transfer engine.
//!
//! The crate models a feature graph as an arena of tagged nodes and provides
//! the building blocks the export and import pipelines share:
//!
//! - [`ReferenceCache`] for "already emitted" deduplication by object id.
//! - [`SequenceAllocator`] for the two-pass primary-key pre-allocation and the
//!   resulting [`WritePlan`].
//! - [`LodFilter`] for level-of-detail pruning.
//! - [`Postprocessor`] for cascading cleanup, appearance linkage and envelope
//!   recomputation after pruning.
//!
//! Database access is abstracted behind the traits in [`adapter`]; concrete
//! backends live in downstream crates.

#![forbid(unsafe_code)]

pub mod adapter;
pub mod cache;
pub mod envelope;
pub mod error;
pub mod lod;
pub mod model;
pub mod postprocess;
pub mod sequence;
#[doc(hidden)]
pub mod test_support;

pub use adapter::{
    AdapterError, ConnectionPool, ImplicitGeometryLookup, SchemaMapping, SequenceSource,
    SrsResolver,
};
pub use cache::{CacheType, ReferenceCache};
pub use envelope::Envelope;
pub use error::GraphError;
pub use lod::{Lod, LodFilter, LodMode, PruneLog};
pub use model::{
    Address, Appearance, AttributeValue, Feature, FeatureGraph, FeatureType, Geometry,
    GeometryType, ImplicitGeometry, ImplicitPlacement, Link, Material, Node, NodeId, NodeKind,
    Property, PropertyValue, RelationType, Ring, RingCoordinates, Surface, SurfaceData,
    SurfaceDataKind, SurfaceMapping, SurfaceTarget, Texture, TextureImage,
};
pub use postprocess::{
    AppearanceLinkage, Direction, PostprocessReport, Postprocessor, compute_envelopes,
    link_appearances,
};
pub use sequence::{
    PlanError, PlannedTarget, PlannedValue, Sequence, SequenceAllocator, SequenceCount,
    SequenceError, SequenceValues, Visit, WritePlan,
};
