//! Write pass: turn a counted graph into rows with pre-allocated keys.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;

use thiserror::Error;

use crate::cache::CacheType;
use crate::envelope::Envelope;
use crate::error::GraphError;
use crate::lod::Lod;
use crate::model::{
    Address, AttributeValue, FeatureGraph, FeatureType, Geometry, ImplicitPlacement, Link, Node,
    NodeId, NodeKind, PropertyValue, RelationType, SurfaceDataKind, SurfaceMapping,
};
use crate::sequence::{Sequence, SequenceError, SequenceValues, Visit};

/// Failures while building a [`WritePlan`].
#[derive(Debug, Error)]
pub enum PlanError {
    /// Counting and consumption disagreed.
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    /// The graph is structurally inconsistent.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Target of a reference column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedTarget {
    /// Database id known at plan time.
    Id(i64),
    /// Object id still to be resolved.
    Href {
        /// Category to resolve in; `None` for kinds that are never shared.
        cache_type: Option<CacheType>,
        /// Referenced object id.
        object_id: String,
    },
}

impl PlannedTarget {
    fn href(cache_type: Option<CacheType>, object_id: impl Into<String>) -> Self {
        Self::Href {
            cache_type,
            object_id: object_id.into(),
        }
    }

    /// Database id, when resolved.
    #[must_use]
    pub const fn id(&self) -> Option<i64> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Href { .. } => None,
        }
    }

    /// Unresolved object id, if any.
    #[must_use]
    pub fn object_id(&self) -> Option<&str> {
        match self {
            Self::Id(_) => None,
            Self::Href { object_id, .. } => Some(object_id.as_str()),
        }
    }
}

/// Planned content of a property row, mirroring [`PropertyValue`] with
/// links replaced by [`PlannedTarget`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedValue {
    /// Plain attribute.
    Attribute(AttributeValue),
    /// Explicit geometry.
    Geometry {
        /// Level of detail.
        lod: Option<Lod>,
        /// Geometry row.
        target: PlannedTarget,
    },
    /// Implicit geometry instance.
    ImplicitGeometry {
        /// Level of detail.
        lod: Option<Lod>,
        /// Implicit geometry row.
        target: PlannedTarget,
        /// Instance placement.
        placement: ImplicitPlacement,
    },
    /// Nested or related feature.
    Feature {
        /// Ownership semantics.
        relation: RelationType,
        /// Feature row.
        target: PlannedTarget,
    },
    /// Appearance.
    Appearance {
        /// Appearance row.
        target: PlannedTarget,
    },
    /// Address.
    Address {
        /// Address row.
        target: PlannedTarget,
    },
}

impl PlannedValue {
    /// Reference column, if the property has one.
    #[must_use]
    pub const fn target(&self) -> Option<&PlannedTarget> {
        match self {
            Self::Attribute(_) => None,
            Self::Geometry { target, .. }
            | Self::ImplicitGeometry { target, .. }
            | Self::Feature { target, .. }
            | Self::Appearance { target }
            | Self::Address { target } => Some(target),
        }
    }

    const fn target_mut(&mut self) -> Option<&mut PlannedTarget> {
        match self {
            Self::Attribute(_) => None,
            Self::Geometry { target, .. }
            | Self::ImplicitGeometry { target, .. }
            | Self::Feature { target, .. }
            | Self::Appearance { target }
            | Self::Address { target } => Some(target),
        }
    }
}

/// Row of the `feature` table.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    /// Primary key.
    pub id: i64,
    /// Source node.
    pub node: NodeId,
    /// Object id.
    pub object_id: Option<String>,
    /// Qualified type, mapped to an object class by the writer.
    pub feature_type: FeatureType,
    /// Bounding box.
    pub envelope: Envelope,
    /// Validity start.
    pub creation_date: Option<i64>,
    /// Validity end.
    pub termination_date: Option<i64>,
}

/// Row of the `property` table.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRow {
    /// Primary key.
    pub id: i64,
    /// Owning feature.
    pub feature_id: i64,
    /// Qualified name.
    pub name: String,
    /// Content.
    pub value: PlannedValue,
}

/// Row of the `geometry_data` table.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryRow {
    /// Primary key.
    pub id: i64,
    /// Source node.
    pub node: NodeId,
    /// Object id.
    pub object_id: Option<String>,
    /// Owning feature; `None` for implicit templates.
    pub feature_id: Option<i64>,
    /// Whether this is an implicit geometry template in local coordinates.
    pub implicit: bool,
    /// Content.
    pub geometry: Geometry,
}

/// Row of the `implicit_geometry` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImplicitGeometryRow {
    /// Primary key.
    pub id: i64,
    /// Object id.
    pub object_id: Option<String>,
    /// Template geometry.
    pub relative_geometry_id: Option<i64>,
    /// External library object.
    pub library_object: Option<String>,
    /// MIME type of the library object.
    pub mime_type: Option<String>,
}

/// Row of the `appearance` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppearanceRow {
    /// Primary key.
    pub id: i64,
    /// Object id.
    pub object_id: Option<String>,
    /// Theme.
    pub theme: Option<String>,
    /// Owning feature.
    pub feature_id: i64,
}

/// Row of the `appear_to_surface_data` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppearToSurfaceDataRow {
    /// Primary key.
    pub id: i64,
    /// Appearance side.
    pub appearance_id: i64,
    /// Surface data side.
    pub target: PlannedTarget,
}

/// Row of the `surface_data` table.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceDataRow {
    /// Primary key.
    pub id: i64,
    /// Object id.
    pub object_id: Option<String>,
    /// Front face flag.
    pub is_front: bool,
    /// Payload with the texture image link removed.
    pub kind: SurfaceDataKind,
    /// Texture image.
    pub image: Option<PlannedTarget>,
}

/// Row of the `surface_data_mapping` table.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceDataMappingRow {
    /// Surface data side.
    pub surface_data_id: i64,
    /// Geometry holding the targeted surface.
    pub geometry_data_id: i64,
    /// Targeted surface object id.
    pub surface: String,
    /// Mapping payload.
    pub mapping: SurfaceMapping,
}

/// Row of the `tex_image` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TexImageRow {
    /// Primary key.
    pub id: i64,
    /// Object id.
    pub object_id: Option<String>,
    /// Image location.
    pub uri: String,
    /// MIME type.
    pub mime_type: Option<String>,
    /// Image content.
    pub data: Option<Vec<u8>>,
}

/// Row of the `address` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRow {
    /// Primary key.
    pub id: i64,
    /// Object id.
    pub object_id: Option<String>,
    /// Content.
    pub address: Address,
}

/// Rows produced by one write pass, keyed by pre-allocated ids.
///
/// Building a plan assigns `database_id` on every node that received a row
/// and checks that every allocated sequence value was consumed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WritePlan {
    /// Feature rows, root first.
    pub features: Vec<FeatureRow>,
    /// Property rows.
    pub properties: Vec<PropertyRow>,
    /// Geometry rows.
    pub geometries: Vec<GeometryRow>,
    /// Implicit geometry rows.
    pub implicit_geometries: Vec<ImplicitGeometryRow>,
    /// Appearance rows.
    pub appearances: Vec<AppearanceRow>,
    /// Appearance to surface data rows.
    pub appear_to_surface_data: Vec<AppearToSurfaceDataRow>,
    /// Surface data rows.
    pub surface_data: Vec<SurfaceDataRow>,
    /// Surface data mapping rows.
    pub surface_data_mappings: Vec<SurfaceDataMappingRow>,
    /// Texture image rows.
    pub tex_images: Vec<TexImageRow>,
    /// Address rows.
    pub addresses: Vec<AddressRow>,
}

impl WritePlan {
    /// Walk `graph` in counting order and consume `values`.
    ///
    /// References to objects written earlier in the same plan are resolved to
    /// their ids; the rest stay as [`PlannedTarget::Href`] for
    /// [`WritePlan::resolve_deferred`].
    ///
    /// # Errors
    /// Fails when counting and consumption disagree or when a surface
    /// targeted by surface data has no geometry id.
    pub fn build(graph: &mut FeatureGraph, values: &mut SequenceValues) -> Result<Self, PlanError> {
        let root = graph.root_id()?;
        let mut walk = PlanWalk {
            graph,
            values,
            plan: Self::default(),
            written: HashMap::new(),
            path: HashSet::new(),
            outcomes: HashMap::new(),
            surface_data_nodes: Vec::new(),
        };
        walk.feature(root)?;
        walk.mappings()?;
        let PlanWalk {
            values,
            mut plan,
            written,
            ..
        } = walk;
        values.ensure_consumed()?;
        plan.resolve_written(&written);
        Ok(plan)
    }

    /// Database id of the root feature.
    #[must_use]
    pub fn root_feature_id(&self) -> Option<i64> {
        self.features.first().map(|row| row.id)
    }

    /// Number of rows across all tables.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.features.len()
            + self.properties.len()
            + self.geometries.len()
            + self.implicit_geometries.len()
            + self.appearances.len()
            + self.appear_to_surface_data.len()
            + self.surface_data.len()
            + self.surface_data_mappings.len()
            + self.tex_images.len()
            + self.addresses.len()
    }

    /// Unresolved references still carried by the plan.
    pub fn deferred(&self) -> impl Iterator<Item = &PlannedTarget> {
        let properties = self.properties.iter().filter_map(|row| row.value.target());
        let links = self.appear_to_surface_data.iter().map(|row| &row.target);
        let images = self.surface_data.iter().filter_map(|row| row.image.as_ref());
        properties
            .chain(links)
            .chain(images)
            .filter(|target| matches!(target, PlannedTarget::Href { .. }))
    }

    /// Resolve remaining references with `resolve`, typically a database
    /// lookup by object id.
    ///
    /// Returns the object ids that stayed unresolved.
    ///
    /// # Errors
    /// Propagates the first error returned by `resolve`.
    pub fn resolve_deferred<E>(
        &mut self,
        mut resolve: impl FnMut(CacheType, &str) -> Result<Option<i64>, E>,
    ) -> Result<Vec<String>, E> {
        let mut unresolved = Vec::new();
        for target in self.targets_mut() {
            let PlannedTarget::Href {
                cache_type,
                object_id,
            } = target
            else {
                continue;
            };
            let found = match cache_type {
                Some(cache_type) => resolve(*cache_type, object_id)?,
                None => None,
            };
            match found {
                Some(id) => *target = PlannedTarget::Id(id),
                None => unresolved.push(object_id.clone()),
            }
        }
        Ok(unresolved)
    }

    fn resolve_written(&mut self, written: &HashMap<(CacheType, String), i64>) {
        let Ok(_unresolved) = self.resolve_deferred(|cache_type, object_id| {
            Ok::<_, Infallible>(written.get(&(cache_type, object_id.to_owned())).copied())
        });
    }

    fn targets_mut(&mut self) -> impl Iterator<Item = &mut PlannedTarget> {
        let properties = self
            .properties
            .iter_mut()
            .filter_map(|row| row.value.target_mut());
        let links = self
            .appear_to_surface_data
            .iter_mut()
            .map(|row| &mut row.target);
        let images = self
            .surface_data
            .iter_mut()
            .filter_map(|row| row.image.as_mut());
        properties.chain(links).chain(images)
    }
}

enum Entry {
    Fresh(Node),
    Done(PlannedTarget),
}

struct PlanWalk<'g> {
    graph: &'g mut FeatureGraph,
    values: &'g mut SequenceValues,
    plan: WritePlan,
    written: HashMap<(CacheType, String), i64>,
    /// Nodes on the current descent.
    path: HashSet<NodeId>,
    /// Target each finished node resolved to.
    outcomes: HashMap<NodeId, PlannedTarget>,
    surface_data_nodes: Vec<(i64, NodeId)>,
}

impl PlanWalk<'_> {
    /// Dedup checks shared by every kind, mirroring the counting walk.
    ///
    /// A node reached again through a second inline link resolves to what
    /// its first visit produced; only a node still on the current descent is
    /// a cycle.
    fn enter(&mut self, id: NodeId) -> Result<Entry, PlanError> {
        if let Some(target) = self.outcomes.get(&id) {
            return Ok(Entry::Done(target.clone()));
        }
        if !self.path.insert(id) {
            return Err(GraphError::Cycle { id }.into());
        }
        let node = self.graph.node(id)?.clone();
        if let Some(cache_type) = node.kind.cache_type()
            && let Visit::Repeat(object_id) =
                self.values.visit(cache_type, node.object_id.as_deref())
        {
            let target = self.leave(id, PlannedTarget::href(Some(cache_type), object_id));
            return Ok(Entry::Done(target));
        }
        Ok(Entry::Fresh(node))
    }

    fn leave(&mut self, id: NodeId, target: PlannedTarget) -> PlannedTarget {
        self.path.remove(&id);
        self.outcomes.insert(id, target.clone());
        target
    }

    fn assign(&mut self, id: NodeId, node: &Node, sequence: Sequence) -> Result<i64, PlanError> {
        let database_id = self.values.next_value(sequence)?;
        self.record(id, node, database_id)?;
        Ok(database_id)
    }

    fn record(&mut self, id: NodeId, node: &Node, database_id: i64) -> Result<(), PlanError> {
        self.graph.node_mut(id)?.database_id = Some(database_id);
        if let (Some(cache_type), Some(object_id)) = (node.kind.cache_type(), &node.object_id) {
            self.written
                .insert((cache_type, object_id.clone()), database_id);
        }
        Ok(())
    }

    fn link(
        &mut self,
        link: &Link,
        cache_type: CacheType,
        owner: i64,
    ) -> Result<PlannedTarget, PlanError> {
        match link {
            Link::Reference(object_id) => Ok(PlannedTarget::href(Some(cache_type), object_id)),
            Link::Inline(child) => match cache_type {
                CacheType::Feature => self.feature(*child),
                CacheType::Geometry => self.geometry(*child, Some(owner)),
                CacheType::ImplicitGeometry => self.implicit_geometry(*child),
                CacheType::Address => self.address(*child),
                CacheType::SurfaceData => self.surface_data(*child),
                CacheType::TextureImage => self.tex_image(*child),
            },
        }
    }

    fn feature(&mut self, id: NodeId) -> Result<PlannedTarget, PlanError> {
        let node = match self.enter(id)? {
            Entry::Done(target) => return Ok(target),
            Entry::Fresh(node) => node,
        };
        let NodeKind::Feature(feature) = &node.kind else {
            return Err(unexpected(id, "feature", &node).into());
        };
        let feature_id = self.assign(id, &node, Sequence::Feature)?;
        self.plan.features.push(FeatureRow {
            id: feature_id,
            node: id,
            object_id: node.object_id.clone(),
            feature_type: feature.feature_type.clone(),
            envelope: feature.envelope,
            creation_date: feature.creation_date,
            termination_date: feature.termination_date,
        });
        for property in &feature.properties {
            let property_id = self.values.next_value(Sequence::Property)?;
            let value = match &property.value {
                PropertyValue::Attribute { value } => PlannedValue::Attribute(value.clone()),
                PropertyValue::Geometry { lod, link } => PlannedValue::Geometry {
                    lod: *lod,
                    target: self.link(link, CacheType::Geometry, feature_id)?,
                },
                PropertyValue::ImplicitGeometry {
                    lod,
                    link,
                    placement,
                } => PlannedValue::ImplicitGeometry {
                    lod: *lod,
                    target: self.link(link, CacheType::ImplicitGeometry, feature_id)?,
                    placement: placement.clone(),
                },
                PropertyValue::Feature { relation, link } => PlannedValue::Feature {
                    relation: *relation,
                    target: self.link(link, CacheType::Feature, feature_id)?,
                },
                PropertyValue::Appearance { link } => PlannedValue::Appearance {
                    target: match link {
                        Link::Inline(child) => self.appearance(*child, feature_id)?,
                        Link::Reference(object_id) => PlannedTarget::href(None, object_id),
                    },
                },
                PropertyValue::Address { link } => PlannedValue::Address {
                    target: self.link(link, CacheType::Address, feature_id)?,
                },
            };
            self.plan.properties.push(PropertyRow {
                id: property_id,
                feature_id,
                name: property.name.clone(),
                value,
            });
        }
        Ok(self.leave(id, PlannedTarget::Id(feature_id)))
    }

    fn geometry(&mut self, id: NodeId, owner: Option<i64>) -> Result<PlannedTarget, PlanError> {
        let node = match self.enter(id)? {
            Entry::Done(target) => return Ok(target),
            Entry::Fresh(node) => node,
        };
        let NodeKind::Geometry(geometry) = &node.kind else {
            return Err(unexpected(id, "geometry", &node).into());
        };
        let geometry_id = self.assign(id, &node, Sequence::GeometryData)?;
        self.plan.geometries.push(GeometryRow {
            id: geometry_id,
            node: id,
            object_id: node.object_id.clone(),
            feature_id: owner,
            implicit: owner.is_none(),
            geometry: geometry.clone(),
        });
        Ok(self.leave(id, PlannedTarget::Id(geometry_id)))
    }

    fn implicit_geometry(&mut self, id: NodeId) -> Result<PlannedTarget, PlanError> {
        let node = match self.enter(id)? {
            Entry::Done(target) => return Ok(target),
            Entry::Fresh(node) => node,
        };
        let NodeKind::ImplicitGeometry(implicit) = &node.kind else {
            return Err(unexpected(id, "implicit geometry", &node).into());
        };
        let existing = node
            .object_id
            .as_deref()
            .and_then(|object_id| self.values.existing_implicit_geometry(object_id));
        if let Some(database_id) = existing {
            self.record(id, &node, database_id)?;
            return Ok(self.leave(id, PlannedTarget::Id(database_id)));
        }
        let implicit_id = self.assign(id, &node, Sequence::ImplicitGeometry)?;
        let relative_geometry_id = match implicit.relative_geometry {
            Some(template) => self.geometry(template, None)?.id(),
            None => None,
        };
        self.plan.implicit_geometries.push(ImplicitGeometryRow {
            id: implicit_id,
            object_id: node.object_id.clone(),
            relative_geometry_id,
            library_object: implicit.library_object.clone(),
            mime_type: implicit.mime_type.clone(),
        });
        Ok(self.leave(id, PlannedTarget::Id(implicit_id)))
    }

    fn appearance(&mut self, id: NodeId, owner: i64) -> Result<PlannedTarget, PlanError> {
        let node = match self.enter(id)? {
            Entry::Done(target) => return Ok(target),
            Entry::Fresh(node) => node,
        };
        let NodeKind::Appearance(appearance) = &node.kind else {
            return Err(unexpected(id, "appearance", &node).into());
        };
        let appearance_id = self.assign(id, &node, Sequence::Appearance)?;
        self.plan.appearances.push(AppearanceRow {
            id: appearance_id,
            object_id: node.object_id.clone(),
            theme: appearance.theme.clone(),
            feature_id: owner,
        });
        for link in &appearance.surface_data {
            let link_id = self.values.next_value(Sequence::AppearToSurfaceData)?;
            let target = self.link(link, CacheType::SurfaceData, owner)?;
            self.plan.appear_to_surface_data.push(AppearToSurfaceDataRow {
                id: link_id,
                appearance_id,
                target,
            });
        }
        Ok(self.leave(id, PlannedTarget::Id(appearance_id)))
    }

    fn surface_data(&mut self, id: NodeId) -> Result<PlannedTarget, PlanError> {
        let node = match self.enter(id)? {
            Entry::Done(target) => return Ok(target),
            Entry::Fresh(node) => node,
        };
        let NodeKind::SurfaceData(data) = &node.kind else {
            return Err(unexpected(id, "surface data", &node).into());
        };
        let surface_data_id = self.assign(id, &node, Sequence::SurfaceData)?;
        let mut kind = data.kind.clone();
        let image_link = kind.texture_mut().and_then(|texture| texture.image.take());
        let image = match image_link {
            Some(Link::Inline(child)) => Some(self.tex_image(child)?),
            Some(Link::Reference(object_id)) => Some(PlannedTarget::href(
                Some(CacheType::TextureImage),
                object_id,
            )),
            None => None,
        };
        self.plan.surface_data.push(SurfaceDataRow {
            id: surface_data_id,
            object_id: node.object_id.clone(),
            is_front: data.is_front,
            kind,
            image,
        });
        self.surface_data_nodes.push((surface_data_id, id));
        Ok(self.leave(id, PlannedTarget::Id(surface_data_id)))
    }

    fn tex_image(&mut self, id: NodeId) -> Result<PlannedTarget, PlanError> {
        let node = match self.enter(id)? {
            Entry::Done(target) => return Ok(target),
            Entry::Fresh(node) => node,
        };
        let NodeKind::TextureImage(image) = &node.kind else {
            return Err(unexpected(id, "texture image", &node).into());
        };
        let image_id = self.assign(id, &node, Sequence::TexImage)?;
        self.plan.tex_images.push(TexImageRow {
            id: image_id,
            object_id: node.object_id.clone(),
            uri: image.uri.clone(),
            mime_type: image.mime_type.clone(),
            data: image.data.clone(),
        });
        Ok(self.leave(id, PlannedTarget::Id(image_id)))
    }

    fn address(&mut self, id: NodeId) -> Result<PlannedTarget, PlanError> {
        let node = match self.enter(id)? {
            Entry::Done(target) => return Ok(target),
            Entry::Fresh(node) => node,
        };
        let NodeKind::Address(address) = &node.kind else {
            return Err(unexpected(id, "address", &node).into());
        };
        let address_id = self.assign(id, &node, Sequence::Address)?;
        self.plan.addresses.push(AddressRow {
            id: address_id,
            object_id: node.object_id.clone(),
            address: address.clone(),
        });
        Ok(self.leave(id, PlannedTarget::Id(address_id)))
    }

    /// Link every written surface data target to the geometry holding the
    /// surface.
    fn mappings(&mut self) -> Result<(), PlanError> {
        let nodes = std::mem::take(&mut self.surface_data_nodes);
        for (surface_data_id, node_id) in nodes {
            let targets = self.graph.surface_data(node_id)?.targets.clone();
            for target in targets {
                let geometry_data_id = target
                    .resolved
                    .and_then(|geometry| self.graph.database_id(geometry))
                    .or_else(|| self.geometry_holding(&target.surface))
                    .ok_or_else(|| GraphError::MissingDatabaseId {
                        object_id: self
                            .graph
                            .object_id(node_id)
                            .unwrap_or_default()
                            .to_owned(),
                        surface: target.surface.clone(),
                    })?;
                self.plan.surface_data_mappings.push(SurfaceDataMappingRow {
                    surface_data_id,
                    geometry_data_id,
                    surface: target.surface,
                    mapping: target.mapping,
                });
            }
        }
        Ok(())
    }

    fn geometry_holding(&self, surface: &str) -> Option<i64> {
        self.plan
            .geometries
            .iter()
            .find(|row| row.geometry.surface(surface).is_some())
            .map(|row| row.id)
    }
}

fn unexpected(id: NodeId, expected: &'static str, node: &Node) -> GraphError {
    GraphError::UnexpectedKind {
        id,
        expected,
        actual: node.kind.label(),
    }
}
