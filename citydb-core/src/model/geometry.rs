use glam::DVec3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::model::graph::NodeId;

/// Geometry kinds supported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum GeometryType {
    /// Single point.
    Point,
    /// Collection of points.
    MultiPoint,
    /// Single curve.
    LineString,
    /// Collection of curves.
    MultiCurve,
    /// Single surface.
    Polygon,
    /// Unconnected surfaces.
    MultiSurface,
    /// Connected surfaces.
    CompositeSurface,
    /// Surface made of triangles.
    TriangulatedSurface,
    /// Closed volume.
    Solid,
    /// Connected solids.
    CompositeSolid,
    /// Unconnected solids.
    MultiSolid,
}

/// Closed linear ring of a surface.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Ring {
    /// Ring identifier, used to address texture coordinates.
    #[cfg_attr(feature = "serde", serde(default))]
    pub object_id: Option<String>,
    /// Vertices; the first ring of a surface is its exterior.
    pub points: Vec<DVec3>,
}

/// Planar surface, the unit that appearances attach to.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Surface {
    /// Surface identifier referenced by surface data targets.
    #[cfg_attr(feature = "serde", serde(default))]
    pub object_id: Option<String>,
    /// Exterior ring followed by interior rings.
    pub rings: Vec<Ring>,
}

impl Surface {
    /// Surface with a single exterior ring.
    pub fn new(object_id: impl Into<String>, exterior: Vec<DVec3>) -> Self {
        Self {
            object_id: Some(object_id.into()),
            rings: vec![Ring {
                object_id: None,
                points: exterior,
            }],
        }
    }
}

/// Explicit geometry content.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Geometry {
    /// Geometry kind.
    pub geometry_type: GeometryType,
    /// Spatial reference of the coordinates.
    #[cfg_attr(feature = "serde", serde(default))]
    pub srid: Option<i32>,
    /// Points and curve vertices.
    #[cfg_attr(feature = "serde", serde(default))]
    pub points: Vec<DVec3>,
    /// Surfaces of surface and solid kinds.
    #[cfg_attr(feature = "serde", serde(default))]
    pub surfaces: Vec<Surface>,
}

impl Geometry {
    /// Multi-surface built from the given surfaces.
    #[must_use]
    pub fn multi_surface(surfaces: Vec<Surface>) -> Self {
        Self {
            geometry_type: GeometryType::MultiSurface,
            srid: None,
            points: Vec::new(),
            surfaces,
        }
    }

    /// Iterate every coordinate of the geometry.
    pub fn coordinates(&self) -> impl Iterator<Item = DVec3> + '_ {
        self.points.iter().copied().chain(
            self.surfaces
                .iter()
                .flat_map(|surface| surface.rings.iter())
                .flat_map(|ring| ring.points.iter().copied()),
        )
    }

    /// Bounding box of all coordinates.
    #[must_use]
    pub fn envelope(&self) -> Envelope {
        let mut envelope = Envelope::empty().with_srid(self.srid);
        for point in self.coordinates() {
            envelope.include_point(point);
        }
        envelope
    }

    /// Surface with the given object id.
    #[must_use]
    pub fn surface(&self, object_id: &str) -> Option<&Surface> {
        self.surfaces
            .iter()
            .find(|surface| surface.object_id.as_deref() == Some(object_id))
    }
}

/// Reusable geometry template.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ImplicitGeometry {
    /// Template geometry in local coordinates.
    pub relative_geometry: Option<NodeId>,
    /// External library object holding the template, if any.
    pub library_object: Option<String>,
    /// MIME type of the library object.
    pub mime_type: Option<String>,
}
