//! In-memory feature graph.
//!
//! A [`FeatureGraph`] stores every node in an arena addressed by [`NodeId`].
//! Ownership edges are [`Link::Inline`] values; reference edges are
//! [`Link::Reference`] values carrying the target's object id.

mod address;
mod appearance;
mod feature;
mod geometry;
mod graph;

pub use address::Address;
pub use appearance::{
    Appearance, Material, RingCoordinates, SurfaceData, SurfaceDataKind, SurfaceMapping,
    SurfaceTarget, Texture, TextureImage,
};
pub use feature::{
    AttributeValue, Feature, FeatureType, ImplicitPlacement, Property, PropertyValue,
    RelationType,
};
pub use geometry::{Geometry, GeometryType, ImplicitGeometry, Ring, Surface};
pub use graph::{FeatureGraph, Link, Node, NodeId, NodeKind};
