//! Facade crate for the city-model transfer engine.
//!
//! This crate re-exports the core domain types and exposes the SQLite-backed
//! transfer sessions behind the `store-sqlite` feature flag.

#![forbid(unsafe_code)]

pub use citydb_core::{
    AdapterError, CacheType, ConnectionPool, Direction, Envelope, Feature, FeatureGraph,
    FeatureType, GraphError, ImplicitGeometryLookup, Link, Lod, LodFilter, LodMode, Node, NodeId,
    NodeKind, PostprocessReport, Postprocessor, Property, PropertyValue, PruneLog,
    ReferenceCache, RelationType, SchemaMapping, SequenceAllocator, SequenceError,
    SequenceSource, SrsResolver, WritePlan,
};

#[cfg(feature = "store-sqlite")]
pub use citydb_transfer::{
    ExportContext, ExportOptions, ExportedFeature, Exporter, ImportContext, ImportOptions,
    ImportOutcome, Importer, Session, SessionError, SessionState, SqliteAdapter,
    SqliteAdapterError, TransferError, TransferHandle, WorkerContext,
};
