//! Failures of one unit of work and of the session that runs it.

use camino::Utf8PathBuf;
use citydb_core::{AdapterError, GraphError, PlanError, SequenceError};
use rusqlite::Error as SqliteError;
use thiserror::Error;

use crate::sqlite::PoolError;

/// Failure of a single export or import call.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A database statement failed.
    #[error("failed to {operation}")]
    Sqlite {
        /// What the statement was doing, for example `read feature 12`.
        operation: String,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Sequence allocation or consumption failed.
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    /// The feature graph is inconsistent.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Building the write plan failed.
    #[error(transparent)]
    Plan(#[from] PlanError),
    /// No connection could be obtained.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// The feature type has no object class in the schema mapping.
    #[error("feature type {feature_type} is not registered in the schema mapping")]
    UnknownFeatureType {
        /// Qualified feature type.
        feature_type: String,
    },
    /// An object class id read from the database is not registered.
    #[error("object class {object_class_id} is not registered in the schema mapping")]
    UnknownObjectClass {
        /// Object class id of the offending row.
        object_class_id: i64,
    },
    /// A row referenced by id does not exist.
    #[error("{table} row {id} does not exist")]
    MissingRow {
        /// Table that was queried.
        table: &'static str,
        /// Primary key that was looked up.
        id: i64,
    },
    /// A stored row holds values this engine cannot interpret.
    #[error("{table} row {id} is invalid: {reason}")]
    InvalidRow {
        /// Table that was read.
        table: &'static str,
        /// Primary key of the row.
        id: i64,
        /// What was wrong.
        reason: String,
    },
    /// A JSON column could not be encoded or decoded.
    #[error("failed to convert {what} to or from JSON")]
    Json {
        /// Column content, for example `geometry 7`.
        what: String,
        /// Source error produced by `serde_json`.
        #[source]
        source: serde_json::Error,
    },
    /// Writing an external file failed.
    #[error("failed to write external file {path:?}")]
    Io {
        /// Destination path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Transforming an envelope to the target spatial reference failed.
    #[error("failed to transform envelope to SRID {target_srid}")]
    Srs {
        /// Requested SRID.
        target_srid: i32,
        /// Resolver error.
        #[source]
        source: AdapterError,
    },
    /// The session refused or lost the unit of work.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// The unit of work panicked on its worker.
    #[error("unit of work panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },
}

impl TransferError {
    pub(crate) fn sqlite(operation: impl Into<String>) -> impl FnOnce(SqliteError) -> Self {
        let operation = operation.into();
        move |source| Self::Sqlite { operation, source }
    }

    pub(crate) fn json(what: impl Into<String>) -> impl FnOnce(serde_json::Error) -> Self {
        let what = what.into();
        move |source| Self::Json { what, source }
    }
}

/// Illegal-state and lifecycle failures of a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Work was submitted before the session started.
    #[error("session has not been started")]
    NotStarted,
    /// The session was started twice.
    #[error("session has already been started")]
    AlreadyStarted,
    /// Work was submitted after the session closed.
    #[error("session is closed")]
    Closed,
    /// An earlier unit of work failed, so no further work is scheduled.
    #[error("session stopped after an earlier failure")]
    Aborted,
    /// The worker running the unit of work went away without an answer.
    #[error("worker terminated before reporting a result")]
    WorkerLost,
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread")]
    Spawn {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Closing one or more worker contexts failed.
    #[error("{} worker context(s) failed to close", .0.len())]
    Close(Vec<TransferError>),
}
