//! `init` command: create an empty database.

use std::io::Write;

use camino::Utf8PathBuf;
use citydb_core::SrsResolver;
use citydb_transfer::SqliteAdapter;
use clap::Parser;
use log::info;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{ARG_DATABASE, ARG_SRID, CliError, ENV_INIT_DATABASE, write_json};

/// SRID used when none is configured (WGS 84).
pub(crate) const DEFAULT_SRID: i32 = 4326;

/// CLI arguments for the `init` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Create a city-model database with its metadata tables. \
                 Running it against an existing database keeps the stored \
                 SRID and counters.",
    about = "Create an empty city-model database"
)]
#[ortho_config(prefix = "CITYDB")]
pub(crate) struct InitArgs {
    /// Path of the database file.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// SRID of stored coordinates.
    #[arg(long = ARG_SRID, value_name = "srid")]
    #[serde(default)]
    pub(crate) srid: Option<i32>,
}

impl InitArgs {
    fn into_config(self) -> Result<InitConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        InitConfig::try_from(merged)
    }
}

/// Resolved `init` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InitConfig {
    pub(crate) database: Utf8PathBuf,
    pub(crate) srid: i32,
}

impl TryFrom<InitArgs> for InitConfig {
    type Error = CliError;

    fn try_from(args: InitArgs) -> Result<Self, Self::Error> {
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_INIT_DATABASE,
        })?;
        Ok(Self {
            database,
            srid: args.srid.unwrap_or(DEFAULT_SRID),
        })
    }
}

#[derive(Debug, Serialize)]
struct InitSummary {
    database: Utf8PathBuf,
    srid: i32,
}

pub(crate) fn run_init(args: InitArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    run_init_with(&config, writer)
}

pub(crate) fn run_init_with(config: &InitConfig, writer: &mut dyn Write) -> Result<(), CliError> {
    let adapter = SqliteAdapter::create(&config.database, config.srid).map_err(|source| {
        CliError::OpenDatabase {
            path: config.database.clone(),
            source,
        }
    })?;
    let srid = adapter.srs().database_srid();
    info!("database {} uses SRID {srid}", config.database);
    write_json(
        writer,
        &InitSummary {
            database: config.database.clone(),
            srid,
        },
    )
}
