//! `export` command: write stored features to JSON files.

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use citydb_transfer::{ExportOptions, ExportedFeature, Exporter, TransferHandle};
use clap::Parser;
use log::info;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_APPEARANCES, ARG_DATABASE, ARG_FEATURE_ID, ARG_LOD, ARG_LOD_MODE, ARG_OUTPUT,
    ARG_TARGET_SRID, ARG_TEXTURE_BUCKETS, ARG_THREADS, CliError, ENV_EXPORT_DATABASE,
    ENV_EXPORT_FEATURE_ID, ENV_EXPORT_OUTPUT, lod_filter, open_database, require_existing,
    write_json,
};

/// CLI arguments for the `export` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Export stored features by database id. Each feature is \
                 written to <output>/feature_<id>.json; with \
                 --texture-buckets, texture images are extracted below \
                 <output>/appearance.",
    about = "Export features as JSON feature graphs"
)]
#[ortho_config(prefix = "CITYDB")]
pub(crate) struct ExportArgs {
    /// Path of the database file.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Database ids of the features to export.
    #[arg(long = ARG_FEATURE_ID, value_name = "id")]
    #[serde(default)]
    pub(crate) feature_id: Vec<i64>,
    /// Output directory.
    #[arg(long = ARG_OUTPUT, value_name = "dir")]
    #[serde(default)]
    pub(crate) output: Option<Utf8PathBuf>,
    /// Worker threads.
    #[arg(long = ARG_THREADS, value_name = "count")]
    #[serde(default)]
    pub(crate) threads: Option<usize>,
    /// SRID of exported envelopes.
    #[arg(long = ARG_TARGET_SRID, value_name = "srid")]
    #[serde(default)]
    pub(crate) target_srid: Option<i32>,
    /// Levels of detail the LOD mode refers to.
    #[arg(long = ARG_LOD, value_name = "level")]
    #[serde(default)]
    pub(crate) lod: Vec<u8>,
    /// LOD policy: keep, remove, minimum or maximum.
    #[arg(long = ARG_LOD_MODE, value_name = "mode")]
    #[serde(default)]
    pub(crate) lod_mode: Option<String>,
    /// Whether appearances are exported.
    #[arg(long = ARG_APPEARANCES, value_name = "bool")]
    #[serde(default)]
    pub(crate) appearances: Option<bool>,
    /// Extract texture images into this many subdirectories (0 for none).
    #[arg(long = ARG_TEXTURE_BUCKETS, value_name = "count")]
    #[serde(default)]
    pub(crate) texture_buckets: Option<u32>,
}

impl ExportArgs {
    fn into_config(self) -> Result<ExportConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ExportConfig::try_from(merged)
    }
}

/// Resolved `export` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExportConfig {
    pub(crate) database: Utf8PathBuf,
    pub(crate) feature_ids: Vec<i64>,
    pub(crate) output: Utf8PathBuf,
    pub(crate) options: ExportOptions,
}

impl ExportConfig {
    pub(crate) fn validate_sources(&self) -> Result<(), CliError> {
        require_existing(&self.database, ARG_DATABASE)?;
        let output_is_file = citydb_fs::file_is_file(&self.output).unwrap_or(false);
        if output_is_file {
            return Err(CliError::OutputDirectoryNotDirectory {
                path: self.output.clone(),
            });
        }
        Ok(())
    }

    fn graph_path(&self, feature_id: i64) -> Utf8PathBuf {
        self.output.join(format!("feature_{feature_id}.json"))
    }
}

impl TryFrom<ExportArgs> for ExportConfig {
    type Error = CliError;

    fn try_from(args: ExportArgs) -> Result<Self, Self::Error> {
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_EXPORT_DATABASE,
        })?;
        if args.feature_id.is_empty() {
            return Err(CliError::MissingArgument {
                field: ARG_FEATURE_ID,
                env: ENV_EXPORT_FEATURE_ID,
            });
        }
        let output = args.output.ok_or(CliError::MissingArgument {
            field: ARG_OUTPUT,
            env: ENV_EXPORT_OUTPUT,
        })?;

        let mut options = ExportOptions::default()
            .with_lod(lod_filter(args.lod_mode.as_deref(), &args.lod)?)
            .with_appearances(args.appearances.unwrap_or(true));
        if let Some(threads) = args.threads {
            options = options.with_threads(threads);
        }
        if let Some(srid) = args.target_srid {
            options = options.with_target_srid(srid);
        }
        if let Some(buckets) = args.texture_buckets {
            options = options.with_external_files(output.clone(), buckets);
        }

        Ok(Self {
            database,
            feature_ids: args.feature_id,
            output,
            options,
        })
    }
}

/// One exported feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ExportSummary {
    pub(crate) feature_id: i64,
    pub(crate) path: Utf8PathBuf,
    pub(crate) nodes: usize,
    pub(crate) removed_geometries: usize,
}

pub(crate) fn run_export(args: ExportArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    config.validate_sources()?;
    let summaries = execute_export(&config)?;
    write_json(writer, &summaries)
}

pub(crate) fn execute_export(config: &ExportConfig) -> Result<Vec<ExportSummary>, CliError> {
    let adapter = open_database(&config.database)?;
    let exporter = Exporter::new(adapter, config.options.clone());
    exporter.start()?;
    let pending: Vec<(i64, TransferHandle<ExportedFeature>)> = config
        .feature_ids
        .iter()
        .zip(0_u64..)
        .map(|(feature_id, sequence_id)| (*feature_id, exporter.submit(*feature_id, sequence_id)))
        .collect();
    let outcome = write_all(config, pending);
    let closed = exporter.close();
    let summaries = outcome?;
    closed?;
    info!(
        "exported {} feature(s) to {}",
        summaries.len(),
        config.output
    );
    Ok(summaries)
}

fn write_all(
    config: &ExportConfig,
    pending: Vec<(i64, TransferHandle<ExportedFeature>)>,
) -> Result<Vec<ExportSummary>, CliError> {
    let mut summaries = Vec::with_capacity(pending.len());
    for (feature_id, handle) in pending {
        let exported = handle.wait().map_err(|source| CliError::Export {
            feature_id,
            source: Box::new(source),
        })?;
        let path = config.graph_path(feature_id);
        write_graph(&path, &exported)?;
        summaries.push(ExportSummary {
            feature_id,
            path,
            nodes: exported.graph.len(),
            removed_geometries: exported.report.removed_geometries,
        });
    }
    Ok(summaries)
}

fn write_graph(path: &Utf8Path, exported: &ExportedFeature) -> Result<(), CliError> {
    let payload =
        serde_json::to_vec_pretty(&exported.graph).map_err(|source| CliError::SerialiseGraph {
            feature_id: exported.database_id,
            source,
        })?;
    citydb_fs::write_file(path, &payload).map_err(|source| CliError::WriteGraph {
        path: path.to_path_buf(),
        source,
    })
}
