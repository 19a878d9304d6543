//! Collaborator interfaces consumed by the transfer engine.
//!
//! The engine treats the database backend as a set of opaque services. The
//! traits here describe those services; `citydb-transfer` ships a SQLite
//! implementation and [`crate::test_support`] ships in-memory fakes.

use std::error::Error as StdError;

use crate::envelope::Envelope;
use crate::model::FeatureType;
use crate::sequence::Sequence;

/// Boxed error returned by collaborator implementations.
pub type AdapterError = Box<dyn StdError + Send + Sync + 'static>;

/// Source of unique numeric identifiers.
///
/// Implementations must serialize concurrent requests; values are unique
/// within a sequence but carry no ordering meaning.
pub trait SequenceSource: Send + Sync {
    /// Obtain `count` fresh values for `sequence` in one request.
    ///
    /// # Errors
    /// Returns an error when the backend cannot allocate.
    fn next_values(&self, sequence: Sequence, count: usize) -> Result<Vec<i64>, AdapterError>;
}

/// Existence check for implicit geometry templates already persisted.
pub trait ImplicitGeometryLookup {
    /// Database id of the template with `object_id`, if stored.
    ///
    /// # Errors
    /// Returns an error when the backend query fails.
    fn find_implicit_geometry(&self, object_id: &str) -> Result<Option<i64>, AdapterError>;
}

/// Object-class and namespace metadata.
pub trait SchemaMapping: Send + Sync {
    /// Object class id of `feature_type`.
    fn object_class_id(&self, feature_type: &FeatureType) -> Option<i64>;

    /// Feature type of `object_class_id`.
    fn feature_type(&self, object_class_id: i64) -> Option<FeatureType>;

    /// Namespace URI registered for `alias`.
    fn namespace_uri(&self, alias: &str) -> Option<&str>;

    /// Alias registered for namespace `uri`.
    fn namespace_alias(&self, uri: &str) -> Option<&str>;
}

/// Spatial reference resolution.
pub trait SrsResolver: Send + Sync {
    /// SRID the database stores coordinates in.
    fn database_srid(&self) -> i32;

    /// Transform `envelope` into `target_srid`.
    ///
    /// # Errors
    /// Returns an error when no transformation to `target_srid` is known.
    fn transform(&self, envelope: &Envelope, target_srid: i32) -> Result<Envelope, AdapterError>;
}

/// Pool handing out exclusive connections.
pub trait ConnectionPool: Send + Sync {
    /// Scoped connection guard handed out by the pool.
    ///
    /// The connection returns to the pool when the guard is dropped.
    type Connection: Send;

    /// Block until a connection is free and lend it out.
    ///
    /// # Errors
    /// Returns an error when the pool is closed or the connection cannot be
    /// configured.
    fn get(&self, auto_commit: bool) -> Result<Self::Connection, AdapterError>;
}
