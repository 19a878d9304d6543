//! Materialize a stored feature into a [`FeatureGraph`].

use citydb_core::{
    Address, Appearance, CacheType, Envelope, Feature, FeatureGraph, Geometry, ImplicitGeometry,
    ImplicitPlacement, Link, NodeId, NodeKind, Property, PruneLog, ReferenceCache, RelationType,
    SchemaMapping, SurfaceData, SurfaceDataKind, SurfaceMapping, SurfaceTarget, TextureImage,
};
use glam::DVec3;
use log::{trace, warn};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::columns::{AttributeColumns, decode_lod, kind};
use crate::error::TransferError;
use crate::export::external::ExternalFiles;
use crate::options::ExportOptions;
use crate::sqlite::SqliteSchemaMapping;

/// `property` row as stored.
#[derive(Debug)]
struct PropertyRecord {
    id: i64,
    name: String,
    kind: String,
    datatype: Option<String>,
    string: Option<String>,
    int: Option<i64>,
    double: Option<f64>,
    uom: Option<String>,
    lod: Option<i64>,
    relation: Option<i64>,
    feature_id: Option<i64>,
    geometry_id: Option<i64>,
    implicit_id: Option<i64>,
    appearance_id: Option<i64>,
    address_id: Option<i64>,
    href: Option<String>,
    placement: Option<String>,
}

impl PropertyRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            kind: row.get(2)?,
            datatype: row.get(3)?,
            string: row.get(4)?,
            int: row.get(5)?,
            double: row.get(6)?,
            uom: row.get(7)?,
            lod: row.get(8)?,
            relation: row.get(9)?,
            feature_id: row.get(10)?,
            geometry_id: row.get(11)?,
            implicit_id: row.get(12)?,
            appearance_id: row.get(13)?,
            address_id: row.get(14)?,
            href: row.get(15)?,
            placement: row.get(16)?,
        })
    }

    fn reference(&self) -> Option<Link> {
        self.href.clone().map(Link::Reference)
    }

    fn invalid(&self, reason: impl Into<String>) -> TransferError {
        TransferError::InvalidRow {
            table: "property",
            id: self.id,
            reason: reason.into(),
        }
    }
}

/// One read of a feature tree through a borrowed connection.
///
/// The cache and the prune log belong to the calling context and are reset
/// by it after every call.
pub(crate) struct FeatureReader<'a> {
    pub(crate) connection: &'a Connection,
    pub(crate) mapping: &'a SqliteSchemaMapping,
    pub(crate) options: &'a ExportOptions,
    pub(crate) external: Option<&'a ExternalFiles>,
    pub(crate) cache: &'a mut ReferenceCache,
    pub(crate) log: &'a mut PruneLog,
    pub(crate) graph: FeatureGraph,
}

impl FeatureReader<'_> {
    /// Read feature `id` and everything it owns; the feature becomes the
    /// root of the graph.
    pub(crate) fn read_root(mut self, id: i64) -> Result<FeatureGraph, TransferError> {
        let root = self.read_feature(id)?;
        self.graph.set_root(root);
        Ok(self.graph)
    }

    /// Read implicit geometry `id` as the root of the graph.
    pub(crate) fn read_implicit_root(mut self, id: i64) -> Result<FeatureGraph, TransferError> {
        match self.read_implicit_geometry(id)? {
            Link::Inline(root) => {
                self.graph.set_root(root);
                Ok(self.graph)
            }
            Link::Reference(_) => Err(TransferError::InvalidRow {
                table: "implicit_geometry",
                id,
                reason: "already emitted in this call".to_owned(),
            }),
        }
    }

    fn read_feature(&mut self, id: i64) -> Result<NodeId, TransferError> {
        let stored = self
            .connection
            .prepare_cached(
                "SELECT objectclass_id, objectid,
                        envelope_xmin, envelope_ymin, envelope_zmin,
                        envelope_xmax, envelope_ymax, envelope_zmax, envelope_srid,
                        creation_date, termination_date
                 FROM feature WHERE id = ?1",
            )
            .and_then(|mut statement| {
                statement
                    .query_row([id], |row| {
                        let lower = coordinates(row, 2)?;
                        let upper = coordinates(row, 5)?;
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            lower.zip(upper),
                            row.get::<_, Option<i32>>(8)?,
                            row.get::<_, Option<i64>>(9)?,
                            row.get::<_, Option<i64>>(10)?,
                        ))
                    })
                    .optional()
            })
            .map_err(TransferError::sqlite(format!("read feature {id}")))?;
        let Some((class, object_id, corners, srid, creation_date, termination_date)) = stored
        else {
            return Err(TransferError::MissingRow { table: "feature", id });
        };

        let feature_type = self
            .mapping
            .feature_type(class)
            .ok_or(TransferError::UnknownObjectClass {
                object_class_id: class,
            })?;
        let mut feature = Feature::new(feature_type);
        feature.envelope = corners
            .map_or_else(Envelope::empty, |(lower, upper)| Envelope::new(lower, upper))
            .with_srid(srid);
        feature.creation_date = creation_date;
        feature.termination_date = termination_date;

        if let Some(object_id) = &object_id {
            self.cache.lookup_and_put(CacheType::Feature, object_id);
        }
        let node = self.add(object_id, id, NodeKind::Feature(feature))?;
        self.read_properties(node, id)?;
        trace!("read feature {id}");
        Ok(node)
    }

    fn read_properties(&mut self, node: NodeId, feature_id: i64) -> Result<(), TransferError> {
        let records = self
            .connection
            .prepare_cached(
                "SELECT id, name, kind, datatype, val_string, val_int, val_double, val_uom,
                        val_lod, val_relation, val_feature_id, val_geometry_id,
                        val_implicitgeom_id, val_appearance_id, val_address_id, val_href,
                        val_placement
                 FROM property WHERE feature_id = ?1 ORDER BY id",
            )
            .and_then(|mut statement| {
                let rows = statement.query_map([feature_id], PropertyRecord::from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .map_err(TransferError::sqlite(format!(
                "read properties of feature {feature_id}"
            )))?;

        for record in records {
            if let Some(property) = self.read_property(node, record)? {
                self.graph.add_property(node, property)?;
            }
        }
        Ok(())
    }

    fn read_property(
        &mut self,
        owner: NodeId,
        record: PropertyRecord,
    ) -> Result<Option<Property>, TransferError> {
        let property = match record.kind.as_str() {
            kind::ATTRIBUTE => {
                let datatype = record.datatype.clone().unwrap_or_default();
                let value = AttributeColumns::decode(
                    &datatype,
                    record.string.clone(),
                    record.int,
                    record.double,
                    record.uom.clone(),
                )
                .ok_or_else(|| record.invalid(format!("undecodable {datatype:?} attribute")))?;
                Property::attribute(record.name, value)
            }
            kind::GEOMETRY => {
                let lod = decode_lod(record.id, record.lod)?;
                if !self.options.lod.filter(lod) {
                    self.log.mark_removed(owner);
                    return Ok(None);
                }
                let link = match record.geometry_id {
                    Some(id) => self.read_geometry(id)?,
                    None => record.reference().ok_or_else(|| record.invalid("no geometry"))?,
                };
                Property::geometry(record.name, lod, link)
            }
            kind::IMPLICIT_GEOMETRY => {
                let lod = decode_lod(record.id, record.lod)?;
                if !self.options.lod.filter(lod) {
                    self.log.mark_removed(owner);
                    return Ok(None);
                }
                let placement = match &record.placement {
                    Some(json) => serde_json::from_str::<ImplicitPlacement>(json).map_err(
                        TransferError::json(format!("placement of property {}", record.id)),
                    )?,
                    None => ImplicitPlacement::default(),
                };
                let link = match record.implicit_id {
                    Some(id) => self.read_implicit_geometry(id)?,
                    None => record
                        .reference()
                        .ok_or_else(|| record.invalid("no implicit geometry"))?,
                };
                Property::implicit_geometry(record.name, lod, link, placement)
            }
            kind::FEATURE => {
                let relation = RelationType::from_code(record.relation.unwrap_or_default());
                let link = match (record.feature_id, relation) {
                    (Some(id), RelationType::Contains) => match self.read_nested(id)? {
                        Some(link) => link,
                        None => return Ok(None),
                    },
                    (Some(id), RelationType::Relates) => match self.feature_object_id(id)? {
                        Some(object_id) => Link::Reference(object_id),
                        None => {
                            warn!(
                                "skipping property {}: related feature {id} has no object id",
                                record.id
                            );
                            return Ok(None);
                        }
                    },
                    (None, _) => record.reference().ok_or_else(|| record.invalid("no feature"))?,
                };
                Property::feature(record.name, relation, link)
            }
            kind::APPEARANCE => {
                if !self.options.export_appearances {
                    return Ok(None);
                }
                let link = match record.appearance_id {
                    Some(id) => self.read_appearance(id)?,
                    None => record
                        .reference()
                        .ok_or_else(|| record.invalid("no appearance"))?,
                };
                Property::appearance(record.name, link)
            }
            kind::ADDRESS => {
                let link = match record.address_id {
                    Some(id) => self.read_address(id)?,
                    None => record.reference().ok_or_else(|| record.invalid("no address"))?,
                };
                Property::address(record.name, link)
            }
            other => return Err(record.invalid(format!("unknown property kind {other:?}"))),
        };
        Ok(Some(property))
    }

    /// Contained feature, subject to the validity filter; a repeat becomes a
    /// reference.
    fn read_nested(&mut self, id: i64) -> Result<Option<Link>, TransferError> {
        let stored = self
            .connection
            .prepare_cached(
                "SELECT objectclass_id, objectid, creation_date, termination_date
                 FROM feature WHERE id = ?1",
            )
            .and_then(|mut statement| {
                statement
                    .query_row([id], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Option<i64>>(2)?,
                            row.get::<_, Option<i64>>(3)?,
                        ))
                    })
                    .optional()
            })
            .map_err(TransferError::sqlite(format!("read feature {id}")))?;
        let Some((class, object_id, creation_date, termination_date)) = stored else {
            return Err(TransferError::MissingRow { table: "feature", id });
        };

        let feature_type = self
            .mapping
            .feature_type(class)
            .ok_or(TransferError::UnknownObjectClass {
                object_class_id: class,
            })?;
        let mut candidate = Feature::new(feature_type);
        candidate.creation_date = creation_date;
        candidate.termination_date = termination_date;
        if !self.options.validity.accepts(&candidate) {
            trace!("feature {id} skipped by the validity filter");
            return Ok(None);
        }

        if let Some(object_id) = object_id {
            if self.cache.contains(CacheType::Feature, &object_id) {
                return Ok(Some(Link::Reference(object_id)));
            }
        }
        Ok(Some(Link::Inline(self.read_feature(id)?)))
    }

    fn feature_object_id(&self, id: i64) -> Result<Option<String>, TransferError> {
        self.connection
            .prepare_cached("SELECT objectid FROM feature WHERE id = ?1")
            .and_then(|mut statement| {
                statement
                    .query_row([id], |row| row.get::<_, Option<String>>(0))
                    .optional()
            })
            .map(Option::flatten)
            .map_err(TransferError::sqlite(format!("read object id of feature {id}")))
    }

    fn read_geometry(&mut self, id: i64) -> Result<Link, TransferError> {
        let (object_id, json): (Option<String>, String) = self
            .connection
            .prepare_cached("SELECT objectid, geometry FROM geometry_data WHERE id = ?1")
            .and_then(|mut statement| {
                statement
                    .query_row([id], |row| Ok((row.get(0)?, row.get(1)?)))
                    .optional()
            })
            .map_err(TransferError::sqlite(format!("read geometry {id}")))?
            .ok_or(TransferError::MissingRow {
                table: "geometry_data",
                id,
            })?;
        if let Some(link) = self.repeat(CacheType::Geometry, object_id.as_deref()) {
            return Ok(link);
        }
        let geometry: Geometry =
            serde_json::from_str(&json).map_err(TransferError::json(format!("geometry {id}")))?;
        let node = self.add(object_id, id, NodeKind::Geometry(geometry))?;
        Ok(Link::Inline(node))
    }

    fn read_implicit_geometry(&mut self, id: i64) -> Result<Link, TransferError> {
        let (object_id, relative, library_object, mime_type): (
            Option<String>,
            Option<i64>,
            Option<String>,
            Option<String>,
        ) = self
            .connection
            .prepare_cached(
                "SELECT objectid, relative_geometry_id, library_object, mime_type
                 FROM implicit_geometry WHERE id = ?1",
            )
            .and_then(|mut statement| {
                statement
                    .query_row([id], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })
                    .optional()
            })
            .map_err(TransferError::sqlite(format!("read implicit geometry {id}")))?
            .ok_or(TransferError::MissingRow {
                table: "implicit_geometry",
                id,
            })?;
        if let Some(link) = self.repeat(CacheType::ImplicitGeometry, object_id.as_deref()) {
            return Ok(link);
        }
        let node = self.add(
            object_id,
            id,
            NodeKind::ImplicitGeometry(ImplicitGeometry {
                relative_geometry: None,
                library_object,
                mime_type,
            }),
        )?;
        if let Some(template) = relative {
            if let Link::Inline(template) = self.read_geometry(template)? {
                self.graph.set_relative_geometry(node, template)?;
            }
        }
        Ok(Link::Inline(node))
    }

    fn read_address(&mut self, id: i64) -> Result<Link, TransferError> {
        let (object_id, address) = self
            .connection
            .prepare_cached(
                "SELECT objectid, street, house_number, po_box, zip_code, city, state, country
                 FROM address WHERE id = ?1",
            )
            .and_then(|mut statement| {
                statement
                    .query_row([id], |row| {
                        Ok((
                            row.get::<_, Option<String>>(0)?,
                            Address {
                                street: row.get(1)?,
                                house_number: row.get(2)?,
                                po_box: row.get(3)?,
                                zip_code: row.get(4)?,
                                city: row.get(5)?,
                                state: row.get(6)?,
                                country: row.get(7)?,
                            },
                        ))
                    })
                    .optional()
            })
            .map_err(TransferError::sqlite(format!("read address {id}")))?
            .ok_or(TransferError::MissingRow {
                table: "address",
                id,
            })?;
        if let Some(link) = self.repeat(CacheType::Address, object_id.as_deref()) {
            return Ok(link);
        }
        Ok(Link::Inline(self.add(object_id, id, NodeKind::Address(address))?))
    }

    fn read_appearance(&mut self, id: i64) -> Result<Link, TransferError> {
        let (object_id, theme): (Option<String>, Option<String>) = self
            .connection
            .prepare_cached("SELECT objectid, theme FROM appearance WHERE id = ?1")
            .and_then(|mut statement| {
                statement
                    .query_row([id], |row| Ok((row.get(0)?, row.get(1)?)))
                    .optional()
            })
            .map_err(TransferError::sqlite(format!("read appearance {id}")))?
            .ok_or(TransferError::MissingRow {
                table: "appearance",
                id,
            })?;
        let members: Vec<(Option<i64>, Option<String>)> = self
            .connection
            .prepare_cached(
                "SELECT surface_data_id, surface_data_href FROM appear_to_surface_data
                 WHERE appearance_id = ?1 ORDER BY id",
            )
            .and_then(|mut statement| {
                let rows = statement.query_map([id], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect()
            })
            .map_err(TransferError::sqlite(format!(
                "read surface data of appearance {id}"
            )))?;

        let node = self.add(
            object_id,
            id,
            NodeKind::Appearance(Appearance {
                theme,
                surface_data: Vec::new(),
            }),
        )?;
        for member in members {
            let link = match member {
                (Some(surface_data), _) => self.read_surface_data(surface_data)?,
                (None, Some(href)) => Link::Reference(href),
                (None, None) => continue,
            };
            self.graph.add_surface_data(node, link)?;
        }
        Ok(Link::Inline(node))
    }

    fn read_surface_data(&mut self, id: i64) -> Result<Link, TransferError> {
        let stored: (
            Option<String>,
            bool,
            String,
            Option<i64>,
            Option<i64>,
            Option<String>,
        ) = self
            .connection
            .prepare_cached(
                "SELECT objectid, is_front, payload, is_smooth, tex_image_id, tex_image_href
                 FROM surface_data WHERE id = ?1",
            )
            .and_then(|mut statement| {
                statement
                    .query_row([id], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                        ))
                    })
                    .optional()
            })
            .map_err(TransferError::sqlite(format!("read surface data {id}")))?
            .ok_or(TransferError::MissingRow {
                table: "surface_data",
                id,
            })?;
        let (object_id, is_front, payload, is_smooth, image_id, image_href) = stored;
        if let Some(link) = self.repeat(CacheType::SurfaceData, object_id.as_deref()) {
            return Ok(link);
        }

        let mut kind: SurfaceDataKind = serde_json::from_str(&payload)
            .map_err(TransferError::json(format!("surface data {id}")))?;
        if let SurfaceDataKind::Material(material) = &mut kind {
            material.is_smooth = is_smooth.map(|flag| flag != 0);
        }
        let targets = self.read_targets(id)?;
        let is_texture = kind.texture().is_some();
        let node = self.add(
            object_id,
            id,
            NodeKind::SurfaceData(SurfaceData {
                is_front,
                kind,
                targets,
            }),
        )?;

        if is_texture {
            let image = match (image_id, image_href) {
                (Some(image), _) => Some(self.read_texture_image(image)?),
                (None, Some(href)) => Some(Link::Reference(href)),
                (None, None) => None,
            };
            if let Some(image) = image {
                self.graph.set_texture_image(node, image)?;
            }
        }
        Ok(Link::Inline(node))
    }

    fn read_targets(&self, surface_data: i64) -> Result<Vec<SurfaceTarget>, TransferError> {
        let rows: Vec<(i64, String, String)> = self
            .connection
            .prepare_cached(
                "SELECT geometry_data_id, surface, mapping FROM surface_data_mapping
                 WHERE surface_data_id = ?1 ORDER BY geometry_data_id, surface",
            )
            .and_then(|mut statement| {
                let rows = statement.query_map([surface_data], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?;
                rows.collect()
            })
            .map_err(TransferError::sqlite(format!(
                "read mappings of surface data {surface_data}"
            )))?;
        rows.into_iter()
            .map(|(geometry, surface, mapping)| {
                let mapping: SurfaceMapping = serde_json::from_str(&mapping).map_err(
                    TransferError::json(format!("mapping of surface data {surface_data}")),
                )?;
                let mut target = SurfaceTarget::new(surface, mapping);
                target.root_geometry = Some(geometry);
                Ok(target)
            })
            .collect()
    }

    fn read_texture_image(&mut self, id: i64) -> Result<Link, TransferError> {
        let (object_id, uri, mime_type, data): (
            Option<String>,
            String,
            Option<String>,
            Option<Vec<u8>>,
        ) = self
            .connection
            .prepare_cached("SELECT objectid, uri, mime_type, data FROM tex_image WHERE id = ?1")
            .and_then(|mut statement| {
                statement
                    .query_row([id], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })
                    .optional()
            })
            .map_err(TransferError::sqlite(format!("read texture image {id}")))?
            .ok_or(TransferError::MissingRow {
                table: "tex_image",
                id,
            })?;
        if let Some(link) = self.repeat(CacheType::TextureImage, object_id.as_deref()) {
            return Ok(link);
        }
        let mut image = TextureImage {
            uri,
            mime_type,
            data,
        };
        if let Some(external) = self.external {
            external.extract(id, &mut image)?;
        }
        Ok(Link::Inline(self.add(object_id, id, NodeKind::TextureImage(image))?))
    }

    /// Reference link when `object_id` was already emitted in this call;
    /// otherwise marks it as emitted.
    fn repeat(&mut self, cache_type: CacheType, object_id: Option<&str>) -> Option<Link> {
        let object_id = object_id?;
        self.cache
            .lookup_and_put(cache_type, object_id)
            .then(|| Link::Reference(object_id.to_owned()))
    }

    fn add(
        &mut self,
        object_id: Option<String>,
        database_id: i64,
        kind: NodeKind,
    ) -> Result<NodeId, TransferError> {
        let node = match object_id {
            Some(object_id) => self.graph.add_identified(object_id, kind),
            None => self.graph.add(kind),
        };
        self.graph.node_mut(node)?.database_id = Some(database_id);
        Ok(node)
    }
}

fn coordinates(row: &Row<'_>, first: usize) -> rusqlite::Result<Option<DVec3>> {
    let x: Option<f64> = row.get(first)?;
    let y: Option<f64> = row.get(first + 1)?;
    let z: Option<f64> = row.get(first + 2)?;
    Ok(match (x, y, z) {
        (Some(x), Some(y), Some(z)) => Some(DVec3::new(x, y, z)),
        _ => None,
    })
}
