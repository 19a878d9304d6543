//! Persist a [`WritePlan`] inside one transaction.

use citydb_core::sequence::{
    AddressRow, AppearToSurfaceDataRow, AppearanceRow, FeatureRow, GeometryRow,
    ImplicitGeometryRow, PropertyRow, SurfaceDataMappingRow, SurfaceDataRow, TexImageRow,
};
use citydb_core::{PlannedTarget, PlannedValue, SchemaMapping, SurfaceDataKind, WritePlan};
use rusqlite::Transaction;

use crate::columns::{AttributeColumns, encode_flag, kind};
use crate::error::TransferError;

/// Writes plan rows in foreign-key order.
pub(crate) struct PlanWriter<'a, 'conn> {
    pub(crate) transaction: &'a Transaction<'conn>,
    pub(crate) mapping: &'a dyn SchemaMapping,
}

impl PlanWriter<'_, '_> {
    pub(crate) fn write(&self, plan: &WritePlan) -> Result<(), TransferError> {
        self.features(&plan.features)?;
        self.addresses(&plan.addresses)?;
        self.tex_images(&plan.tex_images)?;
        self.geometries(&plan.geometries)?;
        self.implicit_geometries(&plan.implicit_geometries)?;
        self.appearances(&plan.appearances)?;
        self.surface_data(&plan.surface_data)?;
        self.appear_to_surface_data(&plan.appear_to_surface_data)?;
        self.mappings(&plan.surface_data_mappings)?;
        self.properties(&plan.properties)
    }

    fn features(&self, rows: &[FeatureRow]) -> Result<(), TransferError> {
        let mut statement = self
            .transaction
            .prepare_cached(
                "INSERT INTO feature (id, objectclass_id, objectid,
                     envelope_xmin, envelope_ymin, envelope_zmin,
                     envelope_xmax, envelope_ymax, envelope_zmax, envelope_srid,
                     creation_date, termination_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )
            .map_err(TransferError::sqlite("prepare feature insert"))?;
        for row in rows {
            let class = self.mapping.object_class_id(&row.feature_type).ok_or_else(|| {
                TransferError::UnknownFeatureType {
                    feature_type: row.feature_type.to_string(),
                }
            })?;
            let lower = row.envelope.lower();
            let upper = row.envelope.upper();
            statement
                .execute(rusqlite::params![
                    row.id,
                    class,
                    row.object_id,
                    lower.map(|point| point.x),
                    lower.map(|point| point.y),
                    lower.map(|point| point.z),
                    upper.map(|point| point.x),
                    upper.map(|point| point.y),
                    upper.map(|point| point.z),
                    row.envelope.srid(),
                    row.creation_date,
                    row.termination_date,
                ])
                .map_err(TransferError::sqlite(format!("insert feature {}", row.id)))?;
        }
        Ok(())
    }

    fn addresses(&self, rows: &[AddressRow]) -> Result<(), TransferError> {
        let mut statement = self
            .transaction
            .prepare_cached(
                "INSERT INTO address (id, objectid, street, house_number, po_box, zip_code,
                     city, state, country)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .map_err(TransferError::sqlite("prepare address insert"))?;
        for row in rows {
            let address = &row.address;
            statement
                .execute(rusqlite::params![
                    row.id,
                    row.object_id,
                    address.street,
                    address.house_number,
                    address.po_box,
                    address.zip_code,
                    address.city,
                    address.state,
                    address.country,
                ])
                .map_err(TransferError::sqlite(format!("insert address {}", row.id)))?;
        }
        Ok(())
    }

    fn tex_images(&self, rows: &[TexImageRow]) -> Result<(), TransferError> {
        let mut statement = self
            .transaction
            .prepare_cached(
                "INSERT INTO tex_image (id, objectid, uri, mime_type, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(TransferError::sqlite("prepare texture image insert"))?;
        for row in rows {
            statement
                .execute((row.id, &row.object_id, &row.uri, &row.mime_type, &row.data))
                .map_err(TransferError::sqlite(format!(
                    "insert texture image {}",
                    row.id
                )))?;
        }
        Ok(())
    }

    fn geometries(&self, rows: &[GeometryRow]) -> Result<(), TransferError> {
        let mut statement = self
            .transaction
            .prepare_cached(
                "INSERT INTO geometry_data (id, objectid, feature_id, is_implicit, geometry)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(TransferError::sqlite("prepare geometry insert"))?;
        for row in rows {
            let geometry = serde_json::to_string(&row.geometry)
                .map_err(TransferError::json(format!("geometry {}", row.id)))?;
            statement
                .execute((row.id, &row.object_id, row.feature_id, row.implicit, geometry))
                .map_err(TransferError::sqlite(format!("insert geometry {}", row.id)))?;
        }
        Ok(())
    }

    fn implicit_geometries(&self, rows: &[ImplicitGeometryRow]) -> Result<(), TransferError> {
        let mut statement = self
            .transaction
            .prepare_cached(
                "INSERT INTO implicit_geometry (id, objectid, relative_geometry_id,
                     library_object, mime_type)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(TransferError::sqlite("prepare implicit geometry insert"))?;
        for row in rows {
            statement
                .execute((
                    row.id,
                    &row.object_id,
                    row.relative_geometry_id,
                    &row.library_object,
                    &row.mime_type,
                ))
                .map_err(TransferError::sqlite(format!(
                    "insert implicit geometry {}",
                    row.id
                )))?;
        }
        Ok(())
    }

    fn appearances(&self, rows: &[AppearanceRow]) -> Result<(), TransferError> {
        let mut statement = self
            .transaction
            .prepare_cached(
                "INSERT INTO appearance (id, objectid, theme, feature_id)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(TransferError::sqlite("prepare appearance insert"))?;
        for row in rows {
            statement
                .execute((row.id, &row.object_id, &row.theme, row.feature_id))
                .map_err(TransferError::sqlite(format!("insert appearance {}", row.id)))?;
        }
        Ok(())
    }

    fn surface_data(&self, rows: &[SurfaceDataRow]) -> Result<(), TransferError> {
        let mut statement = self
            .transaction
            .prepare_cached(
                "INSERT INTO surface_data (id, objectid, is_front, kind, payload, is_smooth,
                     tex_image_id, tex_image_href)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .map_err(TransferError::sqlite("prepare surface data insert"))?;
        for row in rows {
            let payload = serde_json::to_string(&row.kind)
                .map_err(TransferError::json(format!("surface data {}", row.id)))?;
            let is_smooth = match &row.kind {
                SurfaceDataKind::Material(material) => encode_flag(material.is_smooth),
                SurfaceDataKind::ParameterizedTexture(_)
                | SurfaceDataKind::GeoreferencedTexture(_) => None,
            };
            let (image_id, image_href) = split(row.image.as_ref());
            statement
                .execute(rusqlite::params![
                    row.id,
                    row.object_id,
                    row.is_front,
                    row.kind.label(),
                    payload,
                    is_smooth,
                    image_id,
                    image_href,
                ])
                .map_err(TransferError::sqlite(format!("insert surface data {}", row.id)))?;
        }
        Ok(())
    }

    fn appear_to_surface_data(&self, rows: &[AppearToSurfaceDataRow]) -> Result<(), TransferError> {
        let mut statement = self
            .transaction
            .prepare_cached(
                "INSERT INTO appear_to_surface_data (id, appearance_id, surface_data_id,
                     surface_data_href)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(TransferError::sqlite("prepare appearance link insert"))?;
        for row in rows {
            let (surface_data_id, surface_data_href) = split(Some(&row.target));
            statement
                .execute((row.id, row.appearance_id, surface_data_id, surface_data_href))
                .map_err(TransferError::sqlite(format!(
                    "insert appearance link {}",
                    row.id
                )))?;
        }
        Ok(())
    }

    fn mappings(&self, rows: &[SurfaceDataMappingRow]) -> Result<(), TransferError> {
        let mut statement = self
            .transaction
            .prepare_cached(
                "INSERT OR REPLACE INTO surface_data_mapping (surface_data_id, geometry_data_id,
                     surface, mapping)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(TransferError::sqlite("prepare surface mapping insert"))?;
        for row in rows {
            let mapping = serde_json::to_string(&row.mapping).map_err(TransferError::json(
                format!("mapping of surface data {}", row.surface_data_id),
            ))?;
            statement
                .execute((row.surface_data_id, row.geometry_data_id, &row.surface, mapping))
                .map_err(TransferError::sqlite(format!(
                    "insert mapping of surface data {}",
                    row.surface_data_id
                )))?;
        }
        Ok(())
    }

    fn properties(&self, rows: &[PropertyRow]) -> Result<(), TransferError> {
        let mut statement = self
            .transaction
            .prepare_cached(
                "INSERT INTO property (id, feature_id, name, kind, datatype, val_string, val_int,
                     val_double, val_uom, val_lod, val_relation, val_feature_id,
                     val_geometry_id, val_implicitgeom_id, val_appearance_id, val_address_id,
                     val_href, val_placement)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                     ?16, ?17, ?18)",
            )
            .map_err(TransferError::sqlite("prepare property insert"))?;
        for row in rows {
            let columns = PropertyColumns::encode(row)?;
            statement
                .execute(rusqlite::params![
                    row.id,
                    row.feature_id,
                    row.name,
                    columns.kind,
                    columns.attribute.as_ref().map(|attribute| attribute.datatype),
                    columns.attribute.as_ref().and_then(|attribute| attribute.string.clone()),
                    columns.attribute.as_ref().and_then(|attribute| attribute.int),
                    columns.attribute.as_ref().and_then(|attribute| attribute.double),
                    columns.attribute.as_ref().and_then(|attribute| attribute.uom.clone()),
                    columns.lod,
                    columns.relation,
                    columns.feature_id,
                    columns.geometry_id,
                    columns.implicit_id,
                    columns.appearance_id,
                    columns.address_id,
                    columns.href,
                    columns.placement,
                ])
                .map_err(TransferError::sqlite(format!("insert property {}", row.id)))?;
        }
        Ok(())
    }
}

/// Reference columns of a planned target.
fn split(target: Option<&PlannedTarget>) -> (Option<i64>, Option<&str>) {
    match target {
        Some(PlannedTarget::Id(id)) => (Some(*id), None),
        Some(PlannedTarget::Href { object_id, .. }) => (None, Some(object_id.as_str())),
        None => (None, None),
    }
}

/// Non-key columns of one `property` row.
#[derive(Debug, Default)]
struct PropertyColumns<'a> {
    kind: &'static str,
    attribute: Option<AttributeColumns>,
    lod: Option<u8>,
    relation: Option<i64>,
    feature_id: Option<i64>,
    geometry_id: Option<i64>,
    implicit_id: Option<i64>,
    appearance_id: Option<i64>,
    address_id: Option<i64>,
    href: Option<&'a str>,
    placement: Option<String>,
}

impl<'a> PropertyColumns<'a> {
    fn encode(row: &'a PropertyRow) -> Result<Self, TransferError> {
        let mut columns = Self::default();
        match &row.value {
            PlannedValue::Attribute(value) => {
                columns.kind = kind::ATTRIBUTE;
                columns.attribute = Some(AttributeColumns::encode(value));
            }
            PlannedValue::Geometry { lod, target } => {
                columns.kind = kind::GEOMETRY;
                columns.lod = lod.map(citydb_core::Lod::level);
                (columns.geometry_id, columns.href) = split(Some(target));
            }
            PlannedValue::ImplicitGeometry {
                lod,
                target,
                placement,
            } => {
                columns.kind = kind::IMPLICIT_GEOMETRY;
                columns.lod = lod.map(citydb_core::Lod::level);
                (columns.implicit_id, columns.href) = split(Some(target));
                columns.placement = Some(
                    serde_json::to_string(placement)
                        .map_err(TransferError::json(format!("placement of property {}", row.id)))?,
                );
            }
            PlannedValue::Feature { relation, target } => {
                columns.kind = kind::FEATURE;
                columns.relation = Some(relation.code());
                (columns.feature_id, columns.href) = split(Some(target));
            }
            PlannedValue::Appearance { target } => {
                columns.kind = kind::APPEARANCE;
                (columns.appearance_id, columns.href) = split(Some(target));
            }
            PlannedValue::Address { target } => {
                columns.kind = kind::ADDRESS;
                (columns.address_id, columns.href) = split(Some(target));
            }
        }
        Ok(columns)
    }
}
