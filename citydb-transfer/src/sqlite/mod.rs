//! SQLite backend: schema, connection pool and metadata services.
//!
//! [`SqliteAdapter`] bundles everything a transfer session needs from one
//! database file. Every service it hands out implements the matching
//! collaborator trait from `citydb-core`.

mod lookup;
mod mapping;
mod pool;
mod schema;
mod sequences;
mod srs;

use camino::{Utf8Path, Utf8PathBuf};
use log::info;
use rusqlite::Error as SqliteError;
use thiserror::Error;

pub use lookup::{StoredImplicitGeometries, find_stored};
pub use mapping::SqliteSchemaMapping;
pub use pool::{PoolError, PooledConnection, SqlitePool};
pub use sequences::SqliteSequences;
pub use srs::{MissingTransform, SqliteSrs};

/// Connections a fresh adapter lends out at once.
pub const DEFAULT_POOL_CAPACITY: usize = 16;

/// Errors raised while creating or opening a database.
#[derive(Debug, Error)]
pub enum SqliteAdapterError {
    /// Failed to create the parent directory for the database file.
    #[error("failed to create parent directory of {path:?}")]
    CreateDirectory {
        /// Database path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file does not hold an initialised city-model database.
    #[error("{path:?} is not an initialised city-model database")]
    NotInitialized {
        /// Database path.
        path: Utf8PathBuf,
    },
    /// Opening or configuring a connection failed.
    #[error(transparent)]
    Connection(#[from] PoolError),
    /// Beginning the setup transaction failed.
    #[error("failed to begin schema transaction")]
    BeginTransaction {
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Creating the tables failed.
    #[error("failed to create city-model tables")]
    CreateSchema {
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Seeding a metadata table failed.
    #[error("failed to seed {table} table")]
    Seed {
        /// Table being seeded.
        table: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Committing the setup transaction failed.
    #[error("failed to commit schema transaction")]
    Commit {
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Reading a metadata table failed.
    #[error("failed to load {table} metadata")]
    LoadMetadata {
        /// Table being read.
        table: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// A stored transformation matrix is malformed.
    #[error("invalid transformation from SRID {source_srid} to SRID {target_srid}")]
    InvalidTransform {
        /// Source SRID.
        source_srid: i32,
        /// Target SRID.
        target_srid: i32,
        /// Source error produced by `serde_json`.
        #[source]
        source: serde_json::Error,
    },
    /// Storing a transformation failed.
    #[error("failed to store transformation from SRID {source_srid} to SRID {target_srid}")]
    StoreTransform {
        /// Source SRID.
        source_srid: i32,
        /// Target SRID.
        target_srid: i32,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
}

/// One city-model database file and the services built on it.
#[derive(Debug)]
pub struct SqliteAdapter {
    path: Utf8PathBuf,
    pool: SqlitePool,
    sequences: SqliteSequences,
    mapping: SqliteSchemaMapping,
    srs: SqliteSrs,
}

impl SqliteAdapter {
    /// Create (or reuse) a database at `path` storing coordinates in `srid`.
    ///
    /// Parent directories are created automatically. Tables are created if
    /// missing and metadata is seeded only on first creation, so calling this
    /// on an existing database keeps its SRID and counters.
    ///
    /// # Errors
    /// Returns a [`SqliteAdapterError`] describing the failed setup step.
    pub fn create(path: &Utf8Path, srid: i32) -> Result<Self, SqliteAdapterError> {
        citydb_fs::ensure_parent_dir(path).map_err(|source| {
            SqliteAdapterError::CreateDirectory {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let mut connection = pool::open_connection(path)?;
        let transaction = connection
            .transaction()
            .map_err(|source| SqliteAdapterError::BeginTransaction { source })?;
        schema::install(&transaction, srid)?;
        transaction
            .commit()
            .map_err(|source| SqliteAdapterError::Commit { source })?;
        info!("initialised city-model database at {path}");
        Self::load(path, &connection)
    }

    /// Open an existing database.
    ///
    /// # Errors
    /// Returns [`SqliteAdapterError::NotInitialized`] when the file is missing
    /// or lacks the city-model tables.
    pub fn open(path: &Utf8Path) -> Result<Self, SqliteAdapterError> {
        let exists = citydb_fs::file_is_file(path).unwrap_or(false);
        if !exists {
            return Err(SqliteAdapterError::NotInitialized {
                path: path.to_path_buf(),
            });
        }
        let connection = pool::open_connection(path)?;
        let tables: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'database_srs'",
                [],
                |row| row.get(0),
            )
            .map_err(|source| SqliteAdapterError::LoadMetadata {
                table: "sqlite_master",
                source,
            })?;
        if tables == 0 {
            return Err(SqliteAdapterError::NotInitialized {
                path: path.to_path_buf(),
            });
        }
        Self::load(path, &connection)
    }

    fn load(
        path: &Utf8Path,
        connection: &rusqlite::Connection,
    ) -> Result<Self, SqliteAdapterError> {
        Ok(Self {
            path: path.to_path_buf(),
            pool: SqlitePool::new(path, DEFAULT_POOL_CAPACITY),
            sequences: SqliteSequences::open(path)?,
            mapping: SqliteSchemaMapping::load(connection)?,
            srs: SqliteSrs::load(connection)?,
        })
    }

    /// Replace the connection pool with one of `capacity` connections.
    #[must_use]
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool = SqlitePool::new(&self.path, capacity);
        self
    }

    /// Store an affine transformation, given as sixteen row-major values,
    /// and make it available to [`SqliteAdapter::srs`].
    ///
    /// # Errors
    /// Returns [`SqliteAdapterError::StoreTransform`] when the row cannot be
    /// written.
    pub fn register_transform(
        &self,
        source_srid: i32,
        target_srid: i32,
        matrix: [f64; 16],
    ) -> Result<(), SqliteAdapterError> {
        let encoded = serde_json::to_string(&matrix).map_err(|source| {
            SqliteAdapterError::InvalidTransform {
                source_srid,
                target_srid,
                source,
            }
        })?;
        let connection = self.pool.acquire(true)?;
        connection
            .execute(
                "INSERT OR REPLACE INTO srs_transform (source_srid, target_srid, matrix)
                 VALUES (?1, ?2, ?3)",
                (source_srid, target_srid, encoded),
            )
            .map_err(|source| SqliteAdapterError::StoreTransform {
                source_srid,
                target_srid,
                source,
            })?;
        self.srs
            .register(source_srid, target_srid, srs::row_major(matrix));
        Ok(())
    }

    /// Database path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Sequence source.
    #[must_use]
    pub const fn sequences(&self) -> &SqliteSequences {
        &self.sequences
    }

    /// Schema mapping.
    #[must_use]
    pub const fn mapping(&self) -> &SqliteSchemaMapping {
        &self.mapping
    }

    /// Spatial reference resolver.
    #[must_use]
    pub const fn srs(&self) -> &SqliteSrs {
        &self.srs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use citydb_core::{FeatureType, SchemaMapping, SrsResolver};
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn temp_dir() -> TempDir {
        TempDir::new().expect("create temp dir")
    }

    fn db_path(dir: &TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).expect("utf-8 path")
    }

    #[rstest]
    fn create_seeds_metadata(temp_dir: TempDir) {
        let path = db_path(&temp_dir, "nested/city.db");
        let adapter = SqliteAdapter::create(&path, 25832).expect("create database");

        assert!(path.exists());
        assert_eq!(adapter.srs().database_srid(), 25832);
        assert_eq!(
            adapter
                .mapping()
                .object_class_id(&FeatureType::new("bldg", "Building")),
            Some(10)
        );
        assert_eq!(
            adapter.mapping().namespace_alias("http://www.opengis.net/citygml/building/3.0"),
            Some("bldg")
        );
    }

    #[rstest]
    fn create_is_idempotent(temp_dir: TempDir) {
        let path = db_path(&temp_dir, "city.db");
        SqliteAdapter::create(&path, 25832).expect("first create");
        let again = SqliteAdapter::create(&path, 4326).expect("second create");
        assert_eq!(again.srs().database_srid(), 25832);
    }

    #[rstest]
    fn open_rejects_missing_file(temp_dir: TempDir) {
        let path = db_path(&temp_dir, "missing.db");
        let err = SqliteAdapter::open(&path).expect_err("missing database");
        assert!(matches!(err, SqliteAdapterError::NotInitialized { .. }));
    }

    #[rstest]
    fn open_rejects_foreign_database(temp_dir: TempDir) {
        let path = db_path(&temp_dir, "other.db");
        rusqlite::Connection::open(path.as_std_path())
            .and_then(|connection| connection.execute_batch("CREATE TABLE t (x INTEGER)"))
            .expect("create foreign database");
        let err = SqliteAdapter::open(&path).expect_err("not a city-model database");
        assert!(matches!(err, SqliteAdapterError::NotInitialized { .. }));
    }

    #[rstest]
    fn registered_transforms_survive_reopen(temp_dir: TempDir) {
        let path = db_path(&temp_dir, "city.db");
        let adapter = SqliteAdapter::create(&path, 25832).expect("create database");
        let mut matrix = [0.0; 16];
        for index in [0, 5, 10, 15] {
            matrix[index] = 1.0;
        }
        matrix[3] = 10.0;
        adapter
            .register_transform(25832, 3857, matrix)
            .expect("store transform");
        drop(adapter);

        let reopened = SqliteAdapter::open(&path).expect("reopen");
        let envelope = citydb_core::Envelope::new(glam::DVec3::ZERO, glam::DVec3::ONE);
        let moved = reopened.srs().transform(&envelope, 3857).expect("transform");
        assert_eq!(moved.lower(), Some(glam::DVec3::new(10.0, 0.0, 0.0)));
    }
}
