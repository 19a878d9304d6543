//! Object-id lookups against rows already stored.

use citydb_core::{AdapterError, CacheType, ImplicitGeometryLookup};
use rusqlite::{Connection, OptionalExtension};

/// Table holding rows of `cache_type`.
const fn table_of(cache_type: CacheType) -> &'static str {
    match cache_type {
        CacheType::Feature => "feature",
        CacheType::Geometry => "geometry_data",
        CacheType::ImplicitGeometry => "implicit_geometry",
        CacheType::Address => "address",
        CacheType::SurfaceData => "surface_data",
        CacheType::TextureImage => "tex_image",
    }
}

/// Database id of the first stored row of `cache_type` with `object_id`.
///
/// # Errors
/// Returns the `rusqlite` error when the query fails.
pub fn find_stored(
    connection: &Connection,
    cache_type: CacheType,
    object_id: &str,
) -> Result<Option<i64>, rusqlite::Error> {
    let sql = format!(
        "SELECT id FROM {} WHERE objectid = ?1 ORDER BY id LIMIT 1",
        table_of(cache_type)
    );
    connection
        .prepare_cached(&sql)?
        .query_row([object_id], |row| row.get(0))
        .optional()
}

/// [`ImplicitGeometryLookup`] over one borrowed connection.
#[derive(Debug, Clone, Copy)]
pub struct StoredImplicitGeometries<'a> {
    connection: &'a Connection,
}

impl<'a> StoredImplicitGeometries<'a> {
    /// Lookup through `connection`.
    #[must_use]
    pub const fn new(connection: &'a Connection) -> Self {
        Self { connection }
    }
}

impl ImplicitGeometryLookup for StoredImplicitGeometries<'_> {
    fn find_implicit_geometry(&self, object_id: &str) -> Result<Option<i64>, AdapterError> {
        Ok(find_stored(
            self.connection,
            CacheType::ImplicitGeometry,
            object_id,
        )?)
    }
}
