//! Error types emitted by the CLI.
//!
//! Transfer failures are boxed so that `Result<_, CliError>` stays small.

use std::sync::Arc;

use camino::Utf8PathBuf;
use citydb_core::GraphError;
use citydb_transfer::{SessionError, SqliteAdapterError, TransferError};
use thiserror::Error;

/// Errors emitted by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        field: &'static str,
        env: &'static str,
    },
    /// A referenced input path does not exist on disk.
    #[error("{field} path {path:?} does not exist")]
    MissingSourceFile {
        field: &'static str,
        path: Utf8PathBuf,
    },
    /// A referenced input path exists but is not a file.
    #[error("{field} path {path:?} exists but is not a file")]
    SourcePathNotFile {
        field: &'static str,
        path: Utf8PathBuf,
    },
    /// A referenced input path could not be inspected due to an IO error.
    #[error("failed to inspect {field} path {path:?}: {source}")]
    InspectSourcePath {
        field: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The output directory exists but is not a directory.
    #[error("output directory {path:?} is not a directory")]
    OutputDirectoryNotDirectory { path: Utf8PathBuf },
    /// `--lod-mode` named no known policy.
    #[error("invalid LOD mode: {reason}")]
    InvalidLodMode { reason: String },
    /// `--lod` named a level outside 0..=4.
    #[error("invalid LOD: {source}")]
    InvalidLod {
        #[source]
        source: GraphError,
    },
    /// Creating or opening the database failed.
    #[error("failed to open database {path:?}: {source}")]
    OpenDatabase {
        path: Utf8PathBuf,
        #[source]
        source: SqliteAdapterError,
    },
    /// Opening a feature graph file failed.
    #[error("failed to open feature graph at {path:?}: {source}")]
    OpenGraph {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A feature graph file is not valid JSON.
    #[error("failed to parse feature graph JSON at {path:?}: {source}")]
    ParseGraph {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// Starting or closing a transfer session failed.
    #[error("transfer session failed: {0}")]
    Session(#[from] SessionError),
    /// Importing a feature graph failed.
    #[error("failed to import {path:?}: {source}")]
    Import {
        path: Utf8PathBuf,
        #[source]
        source: Box<TransferError>,
    },
    /// Exporting a feature failed.
    #[error("failed to export feature {feature_id}: {source}")]
    Export {
        feature_id: i64,
        #[source]
        source: Box<TransferError>,
    },
    /// Serializing an exported feature graph failed.
    #[error("failed to serialize feature {feature_id}: {source}")]
    SerialiseGraph {
        feature_id: i64,
        #[source]
        source: serde_json::Error,
    },
    /// Writing an exported feature graph failed.
    #[error("failed to write {path:?}: {source}")]
    WriteGraph {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Serializing the command summary failed.
    #[error("failed to serialize summary: {0}")]
    SerialiseSummary(#[source] serde_json::Error),
    /// Writing the command summary failed.
    #[error("failed to write output: {0}")]
    WriteOutput(#[source] std::io::Error),
}
