//! Spatial reference metadata and envelope transformation.

use std::collections::HashMap;

use citydb_core::{AdapterError, Envelope, SrsResolver};
use glam::DMat4;
use parking_lot::RwLock;
use rusqlite::Connection;
use thiserror::Error;

use super::SqliteAdapterError;

/// No transformation between two SRIDs is registered.
#[derive(Debug, Error)]
#[error("no transformation from SRID {source_srid} to SRID {target_srid} is registered")]
pub struct MissingTransform {
    /// SRID of the stored envelope.
    pub source_srid: i32,
    /// Requested SRID.
    pub target_srid: i32,
}

/// Database SRID plus affine transformations from the `srs_transform` table.
///
/// Transformations are 4x4 matrices stored row-major as JSON arrays.
#[derive(Debug)]
pub struct SqliteSrs {
    database_srid: i32,
    transforms: RwLock<HashMap<(i32, i32), DMat4>>,
}

impl SqliteSrs {
    /// Resolver for a database storing coordinates in `database_srid`.
    #[must_use]
    pub fn new(database_srid: i32) -> Self {
        Self {
            database_srid,
            transforms: RwLock::new(HashMap::new()),
        }
    }

    /// Load the database SRID and registered transformations.
    ///
    /// # Errors
    /// Returns [`SqliteAdapterError::LoadMetadata`] when a query fails and
    /// [`SqliteAdapterError::InvalidTransform`] for a malformed matrix.
    pub fn load(connection: &Connection) -> Result<Self, SqliteAdapterError> {
        let database_srid: i32 = connection
            .query_row("SELECT srid FROM database_srs LIMIT 1", [], |row| row.get(0))
            .map_err(|source| SqliteAdapterError::LoadMetadata {
                table: "database_srs",
                source,
            })?;
        let srs = Self::new(database_srid);

        let mut statement = connection
            .prepare("SELECT source_srid, target_srid, matrix FROM srs_transform")
            .map_err(|source| SqliteAdapterError::LoadMetadata {
                table: "srs_transform",
                source,
            })?;
        let rows = statement
            .query_map([], |row| {
                Ok((
                    row.get::<_, i32>(0)?,
                    row.get::<_, i32>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|source| SqliteAdapterError::LoadMetadata {
                table: "srs_transform",
                source,
            })?;
        for row in rows {
            let (source_srid, target_srid, matrix) =
                row.map_err(|source| SqliteAdapterError::LoadMetadata {
                    table: "srs_transform",
                    source,
                })?;
            let rows: [f64; 16] = serde_json::from_str(&matrix).map_err(|source| {
                SqliteAdapterError::InvalidTransform {
                    source_srid,
                    target_srid,
                    source,
                }
            })?;
            srs.register(source_srid, target_srid, row_major(rows));
        }
        Ok(srs)
    }

    /// Register `matrix` as the transformation from `source_srid` to
    /// `target_srid` for this process only.
    pub fn register(&self, source_srid: i32, target_srid: i32, matrix: DMat4) {
        self.transforms
            .write()
            .insert((source_srid, target_srid), matrix);
    }

    fn matrix(&self, source_srid: i32, target_srid: i32) -> Option<DMat4> {
        self.transforms
            .read()
            .get(&(source_srid, target_srid))
            .copied()
    }
}

/// Matrix from sixteen row-major values.
pub(crate) fn row_major(rows: [f64; 16]) -> DMat4 {
    DMat4::from_cols_array(&rows).transpose()
}

impl SrsResolver for SqliteSrs {
    fn database_srid(&self) -> i32 {
        self.database_srid
    }

    fn transform(&self, envelope: &Envelope, target_srid: i32) -> Result<Envelope, AdapterError> {
        let source_srid = envelope.srid().unwrap_or(self.database_srid);
        if source_srid == target_srid || envelope.is_empty() {
            return Ok((*envelope).with_srid(Some(target_srid)));
        }
        let matrix = self
            .matrix(source_srid, target_srid)
            .ok_or(MissingTransform {
                source_srid,
                target_srid,
            })?;
        Ok(envelope.transform(&matrix).with_srid(Some(target_srid)))
    }
}
