use std::collections::{HashMap, HashSet};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::CacheType;
use crate::error::GraphError;
use crate::model::{
    Address, Appearance, Feature, Geometry, ImplicitGeometry, Property, SurfaceData, TextureImage,
};

/// Index of a node within a [`FeatureGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct NodeId(usize);

impl NodeId {
    /// Position in the arena.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Edge from a property to its target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Link {
    /// The property owns the target node.
    Inline(NodeId),
    /// The property points at another node by object id.
    Reference(String),
}

impl Link {
    /// Owned target, if any.
    #[must_use]
    pub const fn inline(&self) -> Option<NodeId> {
        match self {
            Self::Inline(id) => Some(*id),
            Self::Reference(_) => None,
        }
    }

    /// Referenced object id, if any.
    #[must_use]
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::Inline(_) => None,
            Self::Reference(href) => Some(href.as_str()),
        }
    }
}

/// Closed set of node variants.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "node", content = "data", rename_all = "snake_case"))]
pub enum NodeKind {
    /// City-model feature.
    Feature(Feature),
    /// Explicit geometry.
    Geometry(Geometry),
    /// Implicit geometry template.
    ImplicitGeometry(ImplicitGeometry),
    /// Appearance.
    Appearance(Appearance),
    /// Material or texture.
    SurfaceData(SurfaceData),
    /// External texture image.
    TextureImage(TextureImage),
    /// Postal address.
    Address(Address),
}

impl NodeKind {
    /// Deduplication category; appearances are never deduplicated.
    #[must_use]
    pub const fn cache_type(&self) -> Option<CacheType> {
        match self {
            Self::Feature(_) => Some(CacheType::Feature),
            Self::Geometry(_) => Some(CacheType::Geometry),
            Self::ImplicitGeometry(_) => Some(CacheType::ImplicitGeometry),
            Self::Appearance(_) => None,
            Self::SurfaceData(_) => Some(CacheType::SurfaceData),
            Self::TextureImage(_) => Some(CacheType::TextureImage),
            Self::Address(_) => Some(CacheType::Address),
        }
    }

    /// Variant name used in error messages.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Feature(_) => "feature",
            Self::Geometry(_) => "geometry",
            Self::ImplicitGeometry(_) => "implicit geometry",
            Self::Appearance(_) => "appearance",
            Self::SurfaceData(_) => "surface data",
            Self::TextureImage(_) => "texture image",
            Self::Address(_) => "address",
        }
    }
}

/// Arena entry.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Node {
    /// Stable identifier used for deduplication.
    #[cfg_attr(feature = "serde", serde(default))]
    pub object_id: Option<String>,
    /// Primary key once read from or written to the database.
    #[cfg_attr(feature = "serde", serde(default))]
    pub database_id: Option<i64>,
    /// Owning node, unset for the root and for detached nodes.
    #[cfg_attr(feature = "serde", serde(default))]
    pub parent: Option<NodeId>,
    /// Payload.
    pub kind: NodeKind,
}

macro_rules! typed_accessors {
    ($($get:ident, $get_mut:ident, $variant:ident, $ty:ty, $label:literal;)*) => {
        $(
            #[doc = concat!("Borrow node `id` as a ", $label, ".")]
            ///
            /// # Errors
            /// Fails when the node is missing or holds another variant.
            pub fn $get(&self, id: NodeId) -> Result<&$ty, GraphError> {
                match &self.node(id)?.kind {
                    NodeKind::$variant(value) => Ok(value),
                    other => Err(GraphError::UnexpectedKind {
                        id,
                        expected: $label,
                        actual: other.label(),
                    }),
                }
            }

            #[doc = concat!("Mutably borrow node `id` as a ", $label, ".")]
            ///
            /// # Errors
            /// Fails when the node is missing or holds another variant.
            pub fn $get_mut(&mut self, id: NodeId) -> Result<&mut $ty, GraphError> {
                match &mut self.node_mut(id)?.kind {
                    NodeKind::$variant(value) => Ok(value),
                    other => Err(GraphError::UnexpectedKind {
                        id,
                        expected: $label,
                        actual: other.label(),
                    }),
                }
            }
        )*
    };
}

/// Rooted feature tree stored as an arena.
///
/// Nodes are never removed from the arena. Detaching a subtree removes the
/// owning link, so the subtree stops being reachable from the root while its
/// nodes stay addressable for reference repair.
///
/// # Examples
/// ```
/// use citydb_core::{Feature, FeatureGraph, FeatureType, Link, NodeKind, Property, RelationType};
///
/// let mut graph = FeatureGraph::new();
/// let building = graph.add_identified("b1", NodeKind::Feature(Feature::new(FeatureType::new("bldg", "Building"))));
/// let part = graph.add_identified("p1", NodeKind::Feature(Feature::new(FeatureType::new("bldg", "BuildingPart"))));
/// graph.set_root(building);
/// graph
///     .add_property(building, Property::feature("bldg:consistsOfBuildingPart", RelationType::Contains, Link::Inline(part)))
///     .expect("building is a feature");
///
/// assert_eq!(graph.attached(), vec![building, part]);
/// assert_eq!(graph.get(part).and_then(|node| node.parent), Some(building));
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeatureGraph {
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl FeatureGraph {
    /// Empty graph without a root.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
        }
    }

    /// Append a node without an object id.
    pub fn add(&mut self, kind: NodeKind) -> NodeId {
        self.push(None, kind)
    }

    /// Append a node carrying `object_id`.
    pub fn add_identified(&mut self, object_id: impl Into<String>, kind: NodeKind) -> NodeId {
        self.push(Some(object_id.into()), kind)
    }

    fn push(&mut self, object_id: Option<String>, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            object_id,
            database_id: None,
            parent: None,
            kind,
        });
        id
    }

    /// Make `id` the root of the tree.
    pub const fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    /// Root node, if set.
    #[must_use]
    pub const fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Root node.
    ///
    /// # Errors
    /// Returns [`GraphError::MissingRoot`] for graphs without a root.
    pub fn root_id(&self) -> Result<NodeId, GraphError> {
        self.root.ok_or(GraphError::MissingRoot)
    }

    /// Number of nodes in the arena, attached or not.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node by id.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Mutable node by id.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    /// Node by id.
    ///
    /// # Errors
    /// Returns [`GraphError::DanglingNode`] for ids outside the arena.
    pub fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.get(id).ok_or(GraphError::DanglingNode { id })
    }

    /// Mutable node by id.
    ///
    /// # Errors
    /// Returns [`GraphError::DanglingNode`] for ids outside the arena.
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.get_mut(id).ok_or(GraphError::DanglingNode { id })
    }

    /// Iterate all arena entries.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (NodeId(index), node))
    }

    typed_accessors! {
        feature, feature_mut, Feature, Feature, "feature";
        geometry, geometry_mut, Geometry, Geometry, "geometry";
        implicit_geometry, implicit_geometry_mut, ImplicitGeometry, ImplicitGeometry, "implicit geometry";
        appearance, appearance_mut, Appearance, Appearance, "appearance";
        surface_data, surface_data_mut, SurfaceData, SurfaceData, "surface data";
        texture_image, texture_image_mut, TextureImage, TextureImage, "texture image";
        address, address_mut, Address, Address, "address";
    }

    /// Database id of `id`, if assigned.
    #[must_use]
    pub fn database_id(&self, id: NodeId) -> Option<i64> {
        self.get(id).and_then(|node| node.database_id)
    }

    /// Object id of `id`, if any.
    #[must_use]
    pub fn object_id(&self, id: NodeId) -> Option<&str> {
        self.get(id).and_then(|node| node.object_id.as_deref())
    }

    /// Nodes owned by `id`, in document order.
    #[must_use]
    pub fn inline_children(&self, id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.get(id) else {
            return Vec::new();
        };
        match &node.kind {
            NodeKind::Feature(feature) => feature
                .properties
                .iter()
                .filter_map(|property| property.link().and_then(Link::inline))
                .collect(),
            NodeKind::ImplicitGeometry(implicit) => {
                implicit.relative_geometry.into_iter().collect()
            }
            NodeKind::Appearance(appearance) => appearance
                .surface_data
                .iter()
                .filter_map(Link::inline)
                .collect(),
            NodeKind::SurfaceData(data) => data
                .kind
                .texture()
                .and_then(|texture| texture.image.as_ref())
                .and_then(Link::inline)
                .into_iter()
                .collect(),
            NodeKind::Geometry(_) | NodeKind::TextureImage(_) | NodeKind::Address(_) => {
                Vec::new()
            }
        }
    }

    /// Nodes reachable from the root through owning links, in pre-order.
    #[must_use]
    pub fn attached(&self) -> Vec<NodeId> {
        self.root
            .map(|root| self.descendants(root))
            .unwrap_or_default()
    }

    /// `start` and every node it owns transitively, in pre-order.
    #[must_use]
    pub fn descendants(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![start];
        let mut seen = vec![false; self.nodes.len()];
        while let Some(id) = stack.pop() {
            match seen.get_mut(id.0) {
                Some(flag) if !*flag => *flag = true,
                _ => continue,
            }
            order.push(id);
            stack.extend(self.inline_children(id).into_iter().rev());
        }
        order
    }

    /// Whether `id` is reachable from the root.
    #[must_use]
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.attached().contains(&id)
    }

    /// Map of object id to node for one category, first occurrence wins.
    ///
    /// Attached nodes are indexed before detached ones so lookups prefer the
    /// live copy.
    #[must_use]
    pub fn object_index(&self, cache_type: CacheType) -> HashMap<String, NodeId> {
        let attached = self.attached();
        let live: HashSet<NodeId> = attached.iter().copied().collect();
        let detached = self
            .iter()
            .map(|(id, _)| id)
            .filter(|id| !live.contains(id));
        let mut index = HashMap::new();
        for id in attached.iter().copied().chain(detached) {
            let Some(node) = self.get(id) else { continue };
            if node.kind.cache_type() != Some(cache_type) {
                continue;
            }
            if let Some(object_id) = &node.object_id {
                index.entry(object_id.clone()).or_insert(id);
            }
        }
        index
    }

    /// Locate a node of `cache_type` by object id.
    #[must_use]
    pub fn find_by_object_id(&self, cache_type: CacheType, object_id: &str) -> Option<NodeId> {
        self.object_index(cache_type).get(object_id).copied()
    }

    /// Assign `ID_<uuid>` object ids to attached nodes that lack one.
    ///
    /// Returns how many ids were assigned.
    pub fn ensure_object_ids(&mut self) -> usize {
        let mut assigned = 0;
        for id in self.attached() {
            let Some(node) = self.get_mut(id) else { continue };
            if node.object_id.is_none() && node.kind.cache_type().is_some() {
                node.object_id = Some(format!("ID_{}", Uuid::new_v4()));
                assigned += 1;
            }
        }
        assigned
    }

    /// Append `property` to feature `owner`, adopting an inline target.
    ///
    /// # Errors
    /// Fails when `owner` is not a feature or the inline target is missing.
    pub fn add_property(&mut self, owner: NodeId, property: Property) -> Result<(), GraphError> {
        if let Some(child) = property.link().and_then(Link::inline) {
            self.adopt(owner, child)?;
        }
        self.feature_mut(owner)?.properties.push(property);
        Ok(())
    }

    /// Append a surface data link to appearance `owner`.
    ///
    /// # Errors
    /// Fails when `owner` is not an appearance or the inline target is missing.
    pub fn add_surface_data(&mut self, owner: NodeId, link: Link) -> Result<(), GraphError> {
        if let Some(child) = link.inline() {
            self.adopt(owner, child)?;
        }
        self.appearance_mut(owner)?.surface_data.push(link);
        Ok(())
    }

    /// Set `template` as the relative geometry of implicit geometry `owner`.
    ///
    /// # Errors
    /// Fails when either node is missing or `owner` is not an implicit geometry.
    pub fn set_relative_geometry(
        &mut self,
        owner: NodeId,
        template: NodeId,
    ) -> Result<(), GraphError> {
        self.geometry(template)?;
        self.adopt(owner, template)?;
        self.implicit_geometry_mut(owner)?.relative_geometry = Some(template);
        Ok(())
    }

    /// Attach texture image `image` to texture surface data `owner`.
    ///
    /// # Errors
    /// Fails when `owner` is not a texture.
    pub fn set_texture_image(&mut self, owner: NodeId, image: Link) -> Result<(), GraphError> {
        if let Some(child) = image.inline() {
            self.adopt(owner, child)?;
        }
        let data = self.surface_data_mut(owner)?;
        let actual = data.kind.label();
        let texture = data
            .kind
            .texture_mut()
            .ok_or(GraphError::UnexpectedKind {
                id: owner,
                expected: "texture",
                actual,
            })?;
        texture.image = Some(image);
        Ok(())
    }

    /// Record `parent` as the owner of `child`.
    ///
    /// # Errors
    /// Fails when `child` is not in the arena.
    pub fn adopt(&mut self, parent: NodeId, child: NodeId) -> Result<(), GraphError> {
        self.node(parent)?;
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Whether any attached node is an implicit geometry.
    #[must_use]
    pub fn has_implicit_geometries(&self) -> bool {
        self.attached().into_iter().any(|id| {
            self.get(id)
                .is_some_and(|node| matches!(node.kind, NodeKind::ImplicitGeometry(_)))
        })
    }
}
