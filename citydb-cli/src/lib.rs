//! Command-line interface for moving feature graphs in and out of a
//! city-model database.
#![forbid(unsafe_code)]

use std::io::Write;
use std::sync::Arc;

use camino::Utf8Path;
use citydb_core::{Lod, LodFilter, LodMode};
use citydb_transfer::SqliteAdapter;
use clap::{Parser, Subcommand};
use serde::Serialize;

mod error;
mod export;
mod import;
mod init;

pub use error::CliError;

use export::ExportArgs;
use import::ImportArgs;
use init::InitArgs;

pub(crate) const ARG_DATABASE: &str = "database";
pub(crate) const ARG_SRID: &str = "srid";
pub(crate) const ARG_INPUTS: &str = "inputs";
pub(crate) const ARG_FEATURE_ID: &str = "feature-id";
pub(crate) const ARG_OUTPUT: &str = "output";
pub(crate) const ARG_THREADS: &str = "threads";
pub(crate) const ARG_TARGET_SRID: &str = "target-srid";
pub(crate) const ARG_LOD: &str = "lod";
pub(crate) const ARG_LOD_MODE: &str = "lod-mode";
pub(crate) const ARG_APPEARANCES: &str = "appearances";
pub(crate) const ARG_TEXTURE_BUCKETS: &str = "texture-buckets";
pub(crate) const ENV_INIT_DATABASE: &str = "CITYDB_CMDS_INIT_DATABASE";
pub(crate) const ENV_IMPORT_DATABASE: &str = "CITYDB_CMDS_IMPORT_DATABASE";
pub(crate) const ENV_IMPORT_INPUTS: &str = "CITYDB_CMDS_IMPORT_INPUTS";
pub(crate) const ENV_EXPORT_DATABASE: &str = "CITYDB_CMDS_EXPORT_DATABASE";
pub(crate) const ENV_EXPORT_FEATURE_ID: &str = "CITYDB_CMDS_EXPORT_FEATURE_ID";
pub(crate) const ENV_EXPORT_OUTPUT: &str = "CITYDB_CMDS_EXPORT_OUTPUT";

/// Run the CLI with the current process arguments and environment.
///
/// # Errors
/// Returns a [`CliError`] describing the first failed step.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    let mut stdout = std::io::stdout().lock();
    match cli.command {
        Command::Init(args) => init::run_init(args, &mut stdout),
        Command::Import(args) => import::run_import(args, &mut stdout),
        Command::Export(args) => export::run_export(args, &mut stdout),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "citydb",
    about = "Bulk import and export for city-model databases",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create an empty database.
    Init(InitArgs),
    /// Store feature graphs read from JSON files.
    Import(ImportArgs),
    /// Write stored features to JSON files.
    Export(ExportArgs),
}

/// Fail unless `path` is an existing regular file.
pub(crate) fn require_existing(path: &Utf8Path, field: &'static str) -> Result<(), CliError> {
    match citydb_fs::file_is_file(path) {
        Ok(true) => Ok(()),
        Ok(false) if citydb_fs::dir_is_dir(path).unwrap_or(false) => {
            Err(CliError::SourcePathNotFile {
                field,
                path: path.to_path_buf(),
            })
        }
        Ok(false) => Err(CliError::MissingSourceFile {
            field,
            path: path.to_path_buf(),
        }),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            Err(CliError::MissingSourceFile {
                field,
                path: path.to_path_buf(),
            })
        }
        Err(source) => Err(CliError::InspectSourcePath {
            field,
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Open an initialised database.
pub(crate) fn open_database(path: &Utf8Path) -> Result<Arc<SqliteAdapter>, CliError> {
    SqliteAdapter::open(path)
        .map(Arc::new)
        .map_err(|source| CliError::OpenDatabase {
            path: path.to_path_buf(),
            source,
        })
}

/// Build a LOD filter from the `--lod-mode` and `--lod` options.
pub(crate) fn lod_filter(mode: Option<&str>, levels: &[u8]) -> Result<LodFilter, CliError> {
    let mode = match mode {
        Some(mode) => mode
            .parse::<LodMode>()
            .map_err(|reason| CliError::InvalidLodMode { reason })?,
        None => LodMode::default(),
    };
    let lods = levels
        .iter()
        .map(|level| Lod::new(*level).map_err(|source| CliError::InvalidLod { source }))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(LodFilter::new(mode, lods))
}

/// Write `value` as pretty JSON followed by a newline.
pub(crate) fn write_json<T: Serialize>(writer: &mut dyn Write, value: &T) -> Result<(), CliError> {
    let payload = serde_json::to_string_pretty(value).map_err(CliError::SerialiseSummary)?;
    writer
        .write_all(payload.as_bytes())
        .map_err(CliError::WriteOutput)?;
    writer.write_all(b"\n").map_err(CliError::WriteOutput)?;
    Ok(())
}

#[cfg(test)]
mod tests;
