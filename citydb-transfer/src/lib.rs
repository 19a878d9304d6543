//! Multi-threaded bulk transfer between feature graphs and a city-model
//! database.
//!
//! The crate provides:
//!
//! - [`Session`], a fixed-size worker pool with a bounded backlog and
//!   fail-fast admission, generic over the per-worker [`WorkerContext`].
//! - [`Exporter`] and [`ExportContext`] for reading stored features back into
//!   [`citydb_core::FeatureGraph`]s.
//! - [`Importer`] and [`ImportContext`] for persisting feature graphs with
//!   pre-allocated primary keys.
//! - [`SqliteAdapter`], the SQLite backend implementing the collaborator
//!   traits from `citydb-core`.

#![forbid(unsafe_code)]

mod columns;
pub mod error;
pub mod export;
pub mod import;
pub mod options;
pub mod session;
pub mod sqlite;

pub use error::{SessionError, TransferError};
pub use export::{ExportContext, ExportedFeature, Exporter};
pub use import::{ImportContext, ImportOutcome, Importer};
pub use options::{
    ExportOptions, ExternalFileOptions, ImportOptions, MIN_THREADS, PoolSettings, ValidityFilter,
    ValidityMode, default_threads,
};
pub use session::{ContextFactory, Session, SessionState, TransferHandle, WorkerContext};
pub use sqlite::{
    PoolError, PooledConnection, SqliteAdapter, SqliteAdapterError, SqlitePool,
    SqliteSchemaMapping, SqliteSequences, SqliteSrs,
};
