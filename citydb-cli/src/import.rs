//! `import` command: store feature graphs read from JSON files.

use std::io::{BufReader, Write};

use camino::{Utf8Path, Utf8PathBuf};
use citydb_core::FeatureGraph;
use citydb_fs::open_utf8_file;
use citydb_transfer::{
    ImportOptions, ImportOutcome, Importer, SessionError, TransferError, TransferHandle,
};
use clap::Parser;
use log::info;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_APPEARANCES, ARG_DATABASE, ARG_INPUTS, ARG_LOD, ARG_LOD_MODE, ARG_THREADS, CliError,
    ENV_IMPORT_DATABASE, ENV_IMPORT_INPUTS, lod_filter, open_database, require_existing,
    write_json,
};

/// CLI arguments for the `import` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Import feature graphs into an initialised database. Each \
                 input file holds one JSON-encoded feature graph; graphs are \
                 imported in parallel and the first failure stops the rest.",
    about = "Import JSON feature graphs"
)]
#[ortho_config(prefix = "CITYDB")]
pub(crate) struct ImportArgs {
    /// Feature graph files.
    #[arg(value_name = "path")]
    #[serde(default)]
    pub(crate) inputs: Vec<Utf8PathBuf>,
    /// Path of the database file.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Worker threads.
    #[arg(long = ARG_THREADS, value_name = "count")]
    #[serde(default)]
    pub(crate) threads: Option<usize>,
    /// Levels of detail the LOD mode refers to.
    #[arg(long = ARG_LOD, value_name = "level")]
    #[serde(default)]
    pub(crate) lod: Vec<u8>,
    /// LOD policy: keep, remove, minimum or maximum.
    #[arg(long = ARG_LOD_MODE, value_name = "mode")]
    #[serde(default)]
    pub(crate) lod_mode: Option<String>,
    /// Whether appearances are imported.
    #[arg(long = ARG_APPEARANCES, value_name = "bool")]
    #[serde(default)]
    pub(crate) appearances: Option<bool>,
}

impl ImportArgs {
    fn into_config(self) -> Result<ImportConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ImportConfig::try_from(merged)
    }
}

/// Resolved `import` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImportConfig {
    pub(crate) database: Utf8PathBuf,
    pub(crate) inputs: Vec<Utf8PathBuf>,
    pub(crate) options: ImportOptions,
}

impl ImportConfig {
    pub(crate) fn validate_sources(&self) -> Result<(), CliError> {
        require_existing(&self.database, ARG_DATABASE)?;
        for input in &self.inputs {
            require_existing(input, ARG_INPUTS)?;
        }
        Ok(())
    }
}

impl TryFrom<ImportArgs> for ImportConfig {
    type Error = CliError;

    fn try_from(args: ImportArgs) -> Result<Self, Self::Error> {
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_IMPORT_DATABASE,
        })?;
        if args.inputs.is_empty() {
            return Err(CliError::MissingArgument {
                field: ARG_INPUTS,
                env: ENV_IMPORT_INPUTS,
            });
        }

        let mut options = ImportOptions::default()
            .with_lod(lod_filter(args.lod_mode.as_deref(), &args.lod)?)
            .with_appearances(args.appearances.unwrap_or(true));
        if let Some(threads) = args.threads {
            options = options.with_threads(threads);
        }

        Ok(Self {
            database,
            inputs: args.inputs,
            options,
        })
    }
}

/// One imported file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ImportSummary {
    pub(crate) path: Utf8PathBuf,
    pub(crate) feature_id: i64,
    pub(crate) object_id: Option<String>,
    pub(crate) rows: usize,
    pub(crate) unresolved: Vec<String>,
}

impl ImportSummary {
    fn new(path: &Utf8Path, outcome: ImportOutcome) -> Self {
        Self {
            path: path.to_path_buf(),
            feature_id: outcome.feature_id,
            object_id: outcome.object_id,
            rows: outcome.rows,
            unresolved: outcome.unresolved,
        }
    }
}

pub(crate) fn run_import(args: ImportArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    config.validate_sources()?;
    let summaries = execute_import(&config)?;
    write_json(writer, &summaries)
}

pub(crate) fn execute_import(config: &ImportConfig) -> Result<Vec<ImportSummary>, CliError> {
    let adapter = open_database(&config.database)?;
    let importer = Importer::new(adapter, config.options.clone());
    importer.start()?;
    let outcome = submit_all(&importer, &config.inputs);
    let closed = importer.close();
    let summaries = outcome?;
    closed?;
    info!(
        "imported {} feature graph(s) into {}",
        summaries.len(),
        config.database
    );
    Ok(summaries)
}

fn submit_all(importer: &Importer, inputs: &[Utf8PathBuf]) -> Result<Vec<ImportSummary>, CliError> {
    let mut pending: Vec<(&Utf8Path, TransferHandle<ImportOutcome>)> =
        Vec::with_capacity(inputs.len());
    for path in inputs {
        let graph = load_graph(path)?;
        pending.push((path, importer.submit(graph)));
    }

    let mut summaries = Vec::with_capacity(pending.len());
    let mut first_aborted = None;
    for (path, handle) in pending {
        match handle.wait() {
            Ok(outcome) => summaries.push(ImportSummary::new(path, outcome)),
            Err(TransferError::Session(SessionError::Aborted)) => {
                first_aborted.get_or_insert(path);
            }
            Err(source) => {
                return Err(CliError::Import {
                    path: path.to_path_buf(),
                    source: Box::new(source),
                });
            }
        }
    }
    match first_aborted {
        Some(path) => Err(CliError::Import {
            path: path.to_path_buf(),
            source: Box::new(TransferError::Session(SessionError::Aborted)),
        }),
        None => Ok(summaries),
    }
}

/// Loads a JSON-encoded [`FeatureGraph`] from disk.
pub(crate) fn load_graph(path: &Utf8Path) -> Result<FeatureGraph, CliError> {
    let file = open_utf8_file(path).map_err(|source| CliError::OpenGraph {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|source| CliError::ParseGraph {
        path: path.to_path_buf(),
        source,
    })
}
