#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::model::graph::{Link, NodeId};

/// Themed collection of surface data.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Appearance {
    /// Theme name, for example `rgbTexture`.
    pub theme: Option<String>,
    /// Owned or referenced surface data.
    pub surface_data: Vec<Link>,
}

/// Material parameters of an X3D-style material.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Material {
    /// Diffuse colour as RGB in `0.0..=1.0`.
    pub diffuse_color: Option<[f64; 3]>,
    /// Emissive colour.
    pub emissive_color: Option<[f64; 3]>,
    /// Specular colour.
    pub specular_color: Option<[f64; 3]>,
    /// Shininess.
    pub shininess: Option<f64>,
    /// Transparency.
    pub transparency: Option<f64>,
    /// Whether the material is smooth shaded.
    pub is_smooth: Option<bool>,
}

/// Texture parameters shared by parameterised and georeferenced textures.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Texture {
    /// Texture image, usually shared by reference.
    pub image: Option<Link>,
    /// Texture type, for example `specific`.
    pub texture_type: Option<String>,
    /// Wrap mode, for example `wrap`.
    pub wrap_mode: Option<String>,
    /// Border colour as RGBA.
    pub border_color: Option<[f64; 4]>,
}

/// Surface data variants.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum SurfaceDataKind {
    /// Material.
    Material(Material),
    /// Texture mapped through texture coordinates or a world-to-texture matrix.
    ParameterizedTexture(Texture),
    /// Texture placed by georeferencing.
    GeoreferencedTexture(Texture),
}

impl SurfaceDataKind {
    /// Texture parameters, if this is a texture.
    #[must_use]
    pub const fn texture(&self) -> Option<&Texture> {
        match self {
            Self::Material(_) => None,
            Self::ParameterizedTexture(texture) | Self::GeoreferencedTexture(texture) => {
                Some(texture)
            }
        }
    }

    /// Mutable texture parameters, if this is a texture.
    pub const fn texture_mut(&mut self) -> Option<&mut Texture> {
        match self {
            Self::Material(_) => None,
            Self::ParameterizedTexture(texture) | Self::GeoreferencedTexture(texture) => {
                Some(texture)
            }
        }
    }

    /// Stable label persisted with the row.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Material(_) => "material",
            Self::ParameterizedTexture(_) => "parameterized_texture",
            Self::GeoreferencedTexture(_) => "georeferenced_texture",
        }
    }
}

/// Texture coordinates of one ring.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RingCoordinates {
    /// Ring object id.
    pub ring: String,
    /// One `(s, t)` pair per ring vertex.
    pub coordinates: Vec<[f64; 2]>,
}

/// How surface data is mapped onto a target surface.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", content = "value", rename_all = "snake_case"))]
pub enum SurfaceMapping {
    /// Material applied to the whole surface.
    #[default]
    Material,
    /// Per-ring texture coordinates.
    TextureCoordinates(Vec<RingCoordinates>),
    /// Row-major 3×4 world-to-texture matrix.
    WorldToTexture([f64; 12]),
    /// Georeferenced texture target.
    Georeferenced,
}

/// One surface targeted by surface data.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SurfaceTarget {
    /// Object id of the targeted surface.
    pub surface: String,
    /// Database id of the geometry holding the surface, known after export.
    #[cfg_attr(feature = "serde", serde(default))]
    pub root_geometry: Option<i64>,
    /// Mapping onto the surface.
    #[cfg_attr(feature = "serde", serde(default))]
    pub mapping: SurfaceMapping,
    /// Live geometry node holding the surface, set by appearance linkage.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub resolved: Option<NodeId>,
}

impl SurfaceTarget {
    /// Unresolved target of `surface` with the given mapping.
    pub fn new(surface: impl Into<String>, mapping: SurfaceMapping) -> Self {
        Self {
            surface: surface.into(),
            root_geometry: None,
            mapping,
            resolved: None,
        }
    }
}

/// Material or texture applied to surfaces.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SurfaceData {
    /// Whether the front face is targeted.
    #[cfg_attr(feature = "serde", serde(default = "front_default"))]
    pub is_front: bool,
    /// Variant payload.
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub kind: SurfaceDataKind,
    /// Targeted surfaces.
    #[cfg_attr(feature = "serde", serde(default))]
    pub targets: Vec<SurfaceTarget>,
}

#[cfg(feature = "serde")]
const fn front_default() -> bool {
    true
}

impl SurfaceData {
    /// Front-facing surface data with no targets.
    #[must_use]
    pub const fn new(kind: SurfaceDataKind) -> Self {
        Self {
            is_front: true,
            kind,
            targets: Vec::new(),
        }
    }
}

/// External texture image.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TextureImage {
    /// Location of the image, rewritten when images are extracted.
    pub uri: String,
    /// MIME type.
    #[cfg_attr(feature = "serde", serde(default))]
    pub mime_type: Option<String>,
    /// Image content when loaded from the database.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub data: Option<Vec<u8>>,
}

impl TextureImage {
    /// File name component of the URI; empty when the URI ends in a
    /// separator or a `.` or `..` segment.
    #[must_use]
    pub fn file_name(&self) -> &str {
        match self.uri.rsplit(['/', '\\']).next() {
            Some("." | "..") | None => "",
            Some(name) => name,
        }
    }
}
