//! Object-class and namespace metadata loaded from the database.

use std::collections::HashMap;

use citydb_core::{FeatureType, SchemaMapping};
use rusqlite::Connection;

use super::SqliteAdapterError;

/// In-memory copy of the `namespace` and `objectclass` tables.
#[derive(Debug, Clone, Default)]
pub struct SqliteSchemaMapping {
    classes: HashMap<FeatureType, i64>,
    types: HashMap<i64, FeatureType>,
    uris: HashMap<String, String>,
    aliases: HashMap<String, String>,
}

impl SqliteSchemaMapping {
    /// Load the metadata tables.
    ///
    /// # Errors
    /// Returns [`SqliteAdapterError::LoadMetadata`] when a query fails.
    pub fn load(connection: &Connection) -> Result<Self, SqliteAdapterError> {
        let mut mapping = Self::default();

        let mut namespaces = connection
            .prepare("SELECT alias, uri FROM namespace")
            .map_err(|source| SqliteAdapterError::LoadMetadata {
                table: "namespace",
                source,
            })?;
        let rows = namespaces
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|source| SqliteAdapterError::LoadMetadata {
                table: "namespace",
                source,
            })?;
        for row in rows {
            let (alias, uri) = row.map_err(|source| SqliteAdapterError::LoadMetadata {
                table: "namespace",
                source,
            })?;
            mapping.register_namespace(alias, uri);
        }

        let mut classes = connection
            .prepare("SELECT id, namespace_alias, classname FROM objectclass")
            .map_err(|source| SqliteAdapterError::LoadMetadata {
                table: "objectclass",
                source,
            })?;
        let rows = classes
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|source| SqliteAdapterError::LoadMetadata {
                table: "objectclass",
                source,
            })?;
        for row in rows {
            let (id, alias, name) = row.map_err(|source| SqliteAdapterError::LoadMetadata {
                table: "objectclass",
                source,
            })?;
            mapping.register_class(id, FeatureType::new(alias, name));
        }

        Ok(mapping)
    }

    fn register_namespace(&mut self, alias: String, uri: String) {
        self.aliases.insert(uri.clone(), alias.clone());
        self.uris.insert(alias, uri);
    }

    fn register_class(&mut self, id: i64, feature_type: FeatureType) {
        self.classes.insert(feature_type.clone(), id);
        self.types.insert(id, feature_type);
    }

    /// Number of registered object classes.
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }
}

impl SchemaMapping for SqliteSchemaMapping {
    fn object_class_id(&self, feature_type: &FeatureType) -> Option<i64> {
        self.classes.get(feature_type).copied()
    }

    fn feature_type(&self, object_class_id: i64) -> Option<FeatureType> {
        self.types.get(&object_class_id).cloned()
    }

    fn namespace_uri(&self, alias: &str) -> Option<&str> {
        self.uris.get(alias).map(String::as_str)
    }

    fn namespace_alias(&self, uri: &str) -> Option<&str> {
        self.aliases.get(uri).map(String::as_str)
    }
}
