//! In-memory collaborators and graph builders used by unit, behaviour and
//! property tests across the workspace.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use glam::DVec3;

use crate::adapter::{AdapterError, ImplicitGeometryLookup, SequenceSource};
use crate::lod::Lod;
use crate::model::{
    Address, Appearance, AttributeValue, Feature, FeatureGraph, FeatureType, Geometry,
    ImplicitGeometry, ImplicitPlacement, Link, Material, NodeId, NodeKind, Property, RelationType,
    Surface, SurfaceData, SurfaceDataKind, SurfaceMapping, SurfaceTarget, Texture, TextureImage,
};
use crate::sequence::Sequence;

/// Sequence source handing out contiguous values starting at 1.
///
/// Counters are lock-free so the source can be shared across worker threads.
#[derive(Debug)]
pub struct MemorySequences {
    next: HashMap<Sequence, AtomicI64>,
    requests: AtomicUsize,
}

impl Default for MemorySequences {
    fn default() -> Self {
        Self {
            next: Sequence::ALL
                .into_iter()
                .map(|sequence| (sequence, AtomicI64::new(1)))
                .collect(),
            requests: AtomicUsize::new(0),
        }
    }
}

impl MemorySequences {
    /// Number of `next_values` calls served.
    #[must_use]
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl SequenceSource for MemorySequences {
    fn next_values(&self, sequence: Sequence, count: usize) -> Result<Vec<i64>, AdapterError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let counter = self
            .next
            .get(&sequence)
            .ok_or_else(|| format!("unknown sequence {sequence}"))?;
        let step = i64::try_from(count)?;
        let start = counter.fetch_add(step, Ordering::SeqCst);
        Ok((start..start + step).collect())
    }
}

/// Sequence source that always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingSequences;

impl SequenceSource for FailingSequences {
    fn next_values(&self, sequence: Sequence, _count: usize) -> Result<Vec<i64>, AdapterError> {
        Err(format!("sequence {sequence} is unavailable").into())
    }
}

/// Implicit geometry lookup backed by a map of object id to database id.
#[derive(Debug, Default, Clone)]
pub struct MemoryImplicitGeometries {
    stored: HashMap<String, i64>,
}

impl MemoryImplicitGeometries {
    /// Lookup pre-populated with `(object id, database id)` pairs.
    pub fn with<'a>(entries: impl IntoIterator<Item = (&'a str, i64)>) -> Self {
        Self {
            stored: entries
                .into_iter()
                .map(|(object_id, id)| (object_id.to_owned(), id))
                .collect(),
        }
    }
}

impl ImplicitGeometryLookup for MemoryImplicitGeometries {
    fn find_implicit_geometry(&self, object_id: &str) -> Result<Option<i64>, AdapterError> {
        Ok(self.stored.get(object_id).copied())
    }
}

/// Unit square in the `z = 0` plane translated by `offset`.
#[must_use]
pub fn square(offset: DVec3) -> Vec<DVec3> {
    [
        DVec3::ZERO,
        DVec3::X,
        DVec3::new(1.0, 1.0, 0.0),
        DVec3::Y,
        DVec3::ZERO,
    ]
    .into_iter()
    .map(|corner| corner + offset)
    .collect()
}

/// Builder for feature graphs rooted at a building.
///
/// Every helper adds an inline property unless its name says otherwise.
/// Object-id collisions are allowed on purpose so tests can model shared
/// objects.
#[derive(Debug)]
pub struct GraphBuilder {
    graph: FeatureGraph,
    root: NodeId,
}

impl GraphBuilder {
    /// Start a graph whose root is a `bldg:Building`.
    #[must_use]
    pub fn building(object_id: &str) -> Self {
        let mut graph = FeatureGraph::new();
        let root = graph.add_identified(object_id, feature_kind("bldg", "Building"));
        graph.set_root(root);
        Self { graph, root }
    }

    /// Root feature.
    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// Mutable access to the graph under construction.
    pub const fn graph_mut(&mut self) -> &mut FeatureGraph {
        &mut self.graph
    }

    /// Finish building.
    #[must_use]
    pub fn finish(self) -> FeatureGraph {
        self.graph
    }

    fn attach(&mut self, owner: NodeId, property: Property) {
        if let Err(err) = self.graph.add_property(owner, property) {
            panic!("test graph is malformed: {err}");
        }
    }

    fn lod(level: Option<u8>) -> Option<Lod> {
        level.map(|level| match Lod::new(level) {
            Ok(lod) => lod,
            Err(err) => panic!("test LOD is invalid: {err}"),
        })
    }

    /// Plain string attribute.
    pub fn attribute(&mut self, owner: NodeId, name: &str, value: &str) {
        self.attach(
            owner,
            Property::attribute(name, AttributeValue::String(value.to_owned())),
        );
    }

    /// Nested `bldg:BuildingPart` joined by `Contains`.
    pub fn part(&mut self, owner: NodeId, object_id: &str) -> NodeId {
        self.child(owner, object_id, RelationType::Contains)
    }

    /// Nested `core:CityObject` joined by `Relates`.
    pub fn related(&mut self, owner: NodeId, object_id: &str) -> NodeId {
        self.child(owner, object_id, RelationType::Relates)
    }

    fn child(&mut self, owner: NodeId, object_id: &str, relation: RelationType) -> NodeId {
        let kind = match relation {
            RelationType::Contains => feature_kind("bldg", "BuildingPart"),
            RelationType::Relates => feature_kind("core", "CityObject"),
        };
        let child = self.graph.add_identified(object_id, kind);
        self.attach(
            owner,
            Property::feature("core:child", relation, Link::Inline(child)),
        );
        child
    }

    /// Reference to a feature by object id.
    pub fn feature_reference(&mut self, owner: NodeId, object_id: &str) {
        self.attach(
            owner,
            Property::feature(
                "core:relatedTo",
                RelationType::Relates,
                Link::Reference(object_id.to_owned()),
            ),
        );
    }

    /// Multi-surface holding a unit square at the origin.
    pub fn geometry(&mut self, owner: NodeId, object_id: &str, lod: Option<u8>) -> NodeId {
        self.geometry_at(owner, object_id, lod, DVec3::ZERO)
    }

    /// Multi-surface holding a unit square translated by `offset`.
    pub fn geometry_at(
        &mut self,
        owner: NodeId,
        object_id: &str,
        lod: Option<u8>,
        offset: DVec3,
    ) -> NodeId {
        let surface = Surface::new(format!("{object_id}-s"), square(offset));
        self.add_geometry(owner, object_id, lod, Geometry::multi_surface(vec![surface]))
    }

    /// Multi-surface with one unit square per surface id.
    pub fn surface_geometry(
        &mut self,
        owner: NodeId,
        object_id: &str,
        lod: Option<u8>,
        surfaces: &[&str],
    ) -> NodeId {
        let surfaces = surfaces
            .iter()
            .map(|surface| Surface::new(*surface, square(DVec3::ZERO)))
            .collect();
        self.add_geometry(owner, object_id, lod, Geometry::multi_surface(surfaces))
    }

    fn add_geometry(
        &mut self,
        owner: NodeId,
        object_id: &str,
        lod: Option<u8>,
        geometry: Geometry,
    ) -> NodeId {
        let node = self
            .graph
            .add_identified(object_id, NodeKind::Geometry(geometry));
        let name = lod.map_or_else(
            || "core:geometry".to_owned(),
            |level| format!("bldg:lod{level}MultiSurface"),
        );
        self.attach(
            owner,
            Property::geometry(name, Self::lod(lod), Link::Inline(node)),
        );
        node
    }

    /// Reference to a geometry by object id.
    pub fn geometry_reference(&mut self, owner: NodeId, object_id: &str, lod: Option<u8>) {
        self.attach(
            owner,
            Property::geometry(
                "core:geometry",
                Self::lod(lod),
                Link::Reference(object_id.to_owned()),
            ),
        );
    }

    /// Implicit geometry whose template is a unit square at the origin,
    /// placed with an identity transformation at the origin.
    pub fn implicit(&mut self, owner: NodeId, object_id: &str, lod: Option<u8>) -> NodeId {
        self.implicit_placed(owner, object_id, lod, ImplicitPlacement::default())
    }

    /// Implicit geometry with a unit-square template and the given placement.
    pub fn implicit_placed(
        &mut self,
        owner: NodeId,
        object_id: &str,
        lod: Option<u8>,
        placement: ImplicitPlacement,
    ) -> NodeId {
        let template = self.graph.add_identified(
            format!("{object_id}-template"),
            NodeKind::Geometry(Geometry::multi_surface(vec![Surface::new(
                format!("{object_id}-template-s"),
                square(DVec3::ZERO),
            )])),
        );
        let implicit = self.graph.add_identified(
            object_id,
            NodeKind::ImplicitGeometry(ImplicitGeometry::default()),
        );
        if let Err(err) = self.graph.set_relative_geometry(implicit, template) {
            panic!("test graph is malformed: {err}");
        }
        self.attach(
            owner,
            Property::implicit_geometry(
                "core:implicitRepresentation",
                Self::lod(lod),
                Link::Inline(implicit),
                placement,
            ),
        );
        implicit
    }

    /// Reference to an implicit geometry by object id.
    pub fn implicit_reference(
        &mut self,
        owner: NodeId,
        object_id: &str,
        lod: Option<u8>,
        placement: ImplicitPlacement,
    ) {
        self.attach(
            owner,
            Property::implicit_geometry(
                "core:implicitRepresentation",
                Self::lod(lod),
                Link::Reference(object_id.to_owned()),
                placement,
            ),
        );
    }

    /// Address owned inline.
    pub fn address(&mut self, owner: NodeId, object_id: &str) -> NodeId {
        let address = self.graph.add_identified(
            object_id,
            NodeKind::Address(Address::street("Main Street", "1")),
        );
        self.attach(owner, Property::address("bldg:address", Link::Inline(address)));
        address
    }

    /// Reference to an address by object id.
    pub fn address_reference(&mut self, owner: NodeId, object_id: &str) {
        self.attach(
            owner,
            Property::address("bldg:address", Link::Reference(object_id.to_owned())),
        );
    }

    /// Empty appearance owned by `owner`.
    pub fn appearance(&mut self, owner: NodeId) -> NodeId {
        let appearance = self.graph.add(NodeKind::Appearance(Appearance {
            theme: Some("rgbTexture".to_owned()),
            surface_data: Vec::new(),
        }));
        self.attach(
            owner,
            Property::appearance("app:appearance", Link::Inline(appearance)),
        );
        appearance
    }

    /// Material targeting the given surfaces.
    pub fn material(&mut self, appearance: NodeId, object_id: &str, surfaces: &[&str]) -> NodeId {
        let mut data = SurfaceData::new(SurfaceDataKind::Material(Material {
            diffuse_color: Some([0.8, 0.8, 0.8]),
            ..Material::default()
        }));
        data.targets = surfaces
            .iter()
            .map(|surface| SurfaceTarget::new(*surface, SurfaceMapping::Material))
            .collect();
        self.add_surface_data(appearance, object_id, data)
    }

    /// Parameterized texture with an inline image targeting the given
    /// surfaces.
    pub fn texture(
        &mut self,
        appearance: NodeId,
        object_id: &str,
        image_uri: &str,
        surfaces: &[&str],
    ) -> NodeId {
        let mut data = SurfaceData::new(SurfaceDataKind::ParameterizedTexture(Texture::default()));
        data.targets = surfaces
            .iter()
            .map(|surface| {
                SurfaceTarget::new(*surface, SurfaceMapping::WorldToTexture([0.0; 12]))
            })
            .collect();
        let texture = self.add_surface_data(appearance, object_id, data);
        let image = self.graph.add_identified(
            image_uri,
            NodeKind::TextureImage(TextureImage {
                uri: image_uri.to_owned(),
                mime_type: Some("image/png".to_owned()),
                data: Some(vec![0x89, b'P', b'N', b'G']),
            }),
        );
        if let Err(err) = self.graph.set_texture_image(texture, Link::Inline(image)) {
            panic!("test graph is malformed: {err}");
        }
        texture
    }

    fn add_surface_data(&mut self, appearance: NodeId, object_id: &str, data: SurfaceData) -> NodeId {
        let node = self
            .graph
            .add_identified(object_id, NodeKind::SurfaceData(data));
        if let Err(err) = self.graph.add_surface_data(appearance, Link::Inline(node)) {
            panic!("test graph is malformed: {err}");
        }
        node
    }

    /// Reference to surface data by object id.
    pub fn surface_data_reference(&mut self, appearance: NodeId, object_id: &str) {
        if let Err(err) = self
            .graph
            .add_surface_data(appearance, Link::Reference(object_id.to_owned()))
        {
            panic!("test graph is malformed: {err}");
        }
    }
}

fn feature_kind(namespace: &str, name: &str) -> NodeKind {
    NodeKind::Feature(Feature::new(FeatureType::new(namespace, name)))
}

