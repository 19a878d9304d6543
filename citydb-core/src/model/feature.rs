use std::fmt;
use std::str::FromStr;

use glam::{DMat4, DVec3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::error::GraphError;
use crate::lod::Lod;
use crate::model::graph::Link;

/// Qualified feature type, for example `bldg:Building`.
///
/// # Examples
/// ```
/// use citydb_core::FeatureType;
///
/// let building: FeatureType = "bldg:Building".parse().expect("valid type");
/// assert_eq!(building.namespace, "bldg");
/// assert_eq!(building.to_string(), "bldg:Building");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct FeatureType {
    /// Namespace alias.
    pub namespace: String,
    /// Local class name.
    pub name: String,
}

impl FeatureType {
    /// Build a feature type from its parts.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

impl FromStr for FeatureType {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self::new(namespace, name))
            }
            _ => Err(GraphError::InvalidFeatureType(s.to_owned())),
        }
    }
}

impl TryFrom<String> for FeatureType {
    type Error = GraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FeatureType> for String {
    fn from(value: FeatureType) -> Self {
        value.to_string()
    }
}

/// How a nested feature relates to its parent.
///
/// Only `Contains` edges express ownership; they drive cascading cleanup and
/// envelope aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RelationType {
    /// The child is part of the parent.
    #[default]
    Contains,
    /// The child is merely related to the parent.
    Relates,
}

impl RelationType {
    /// Numeric code persisted in the property table.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Relates => 0,
            Self::Contains => 1,
        }
    }

    /// Inverse of [`RelationType::code`]; unknown codes read as `Relates`.
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        if code == 1 {
            Self::Contains
        } else {
            Self::Relates
        }
    }
}

/// Scalar attribute value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", content = "value", rename_all = "snake_case"))]
pub enum AttributeValue {
    /// Free text.
    String(String),
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Double(f64),
    /// Boolean flag.
    Boolean(bool),
    /// URI value.
    Uri(String),
    /// Measured value with its unit of measure.
    Measure {
        /// Numeric value.
        value: f64,
        /// Unit of measure, for example `m`.
        uom: Option<String>,
    },
}

/// Placement of an implicit geometry instance.
///
/// The transformation matrix is stored row-major as it appears in city
/// models; [`ImplicitPlacement::matrix`] converts it to column-major.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ImplicitPlacement {
    /// Row-major 4×4 transformation.
    pub transformation: Option<[f64; 16]>,
    /// Anchor point in world coordinates.
    pub reference_point: Option<DVec3>,
}

impl ImplicitPlacement {
    /// Transformation as a matrix; identity when absent.
    #[must_use]
    pub fn matrix(&self) -> DMat4 {
        self.transformation
            .map_or(DMat4::IDENTITY, |rows| DMat4::from_cols_array(&rows).transpose())
    }

    /// Place a template coordinate in world space.
    #[must_use]
    pub fn place(&self, point: DVec3) -> DVec3 {
        self.matrix().transform_point3(point) + self.reference_point.unwrap_or(DVec3::ZERO)
    }

    /// Envelope of a template envelope once placed.
    #[must_use]
    pub fn place_envelope(&self, template: &Envelope) -> Envelope {
        let mut placed = Envelope::empty().with_srid(template.srid());
        for corner in template.corners() {
            placed.include_point(self.place(corner));
        }
        placed
    }
}

/// Value carried by a [`Property`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum PropertyValue {
    /// Plain attribute.
    Attribute {
        /// Attribute content.
        value: AttributeValue,
    },
    /// Explicit geometry.
    Geometry {
        /// Level of detail, if tagged.
        lod: Option<Lod>,
        /// Owned or referenced geometry.
        link: Link,
    },
    /// Implicit geometry instance.
    ImplicitGeometry {
        /// Level of detail, if tagged.
        lod: Option<Lod>,
        /// Owned or referenced implicit geometry.
        link: Link,
        /// Where this instance is placed.
        placement: ImplicitPlacement,
    },
    /// Nested or related feature.
    Feature {
        /// Ownership semantics.
        relation: RelationType,
        /// Owned or referenced feature.
        link: Link,
    },
    /// Appearance owned by the feature.
    Appearance {
        /// Owned or referenced appearance.
        link: Link,
    },
    /// Address, usually shared by reference.
    Address {
        /// Owned or referenced address.
        link: Link,
    },
}

/// Named property of a feature.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Property {
    /// Qualified property name, for example `bldg:lod2Solid`.
    pub name: String,
    /// Property content.
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub value: PropertyValue,
}

impl Property {
    /// Attribute property.
    pub fn attribute(name: impl Into<String>, value: AttributeValue) -> Self {
        Self {
            name: name.into(),
            value: PropertyValue::Attribute { value },
        }
    }

    /// Geometry property.
    pub fn geometry(name: impl Into<String>, lod: Option<Lod>, link: Link) -> Self {
        Self {
            name: name.into(),
            value: PropertyValue::Geometry { lod, link },
        }
    }

    /// Implicit-geometry property.
    pub fn implicit_geometry(
        name: impl Into<String>,
        lod: Option<Lod>,
        link: Link,
        placement: ImplicitPlacement,
    ) -> Self {
        Self {
            name: name.into(),
            value: PropertyValue::ImplicitGeometry {
                lod,
                link,
                placement,
            },
        }
    }

    /// Nested feature property.
    pub fn feature(name: impl Into<String>, relation: RelationType, link: Link) -> Self {
        Self {
            name: name.into(),
            value: PropertyValue::Feature { relation, link },
        }
    }

    /// Appearance property.
    pub fn appearance(name: impl Into<String>, link: Link) -> Self {
        Self {
            name: name.into(),
            value: PropertyValue::Appearance { link },
        }
    }

    /// Address property.
    pub fn address(name: impl Into<String>, link: Link) -> Self {
        Self {
            name: name.into(),
            value: PropertyValue::Address { link },
        }
    }

    /// LOD tag of geometry and implicit-geometry properties.
    #[must_use]
    pub fn lod(&self) -> Option<Lod> {
        match &self.value {
            PropertyValue::Geometry { lod, .. } | PropertyValue::ImplicitGeometry { lod, .. } => {
                *lod
            }
            _ => None,
        }
    }

    /// Whether this is a geometry or implicit-geometry property.
    #[must_use]
    pub fn is_spatial(&self) -> bool {
        matches!(
            self.value,
            PropertyValue::Geometry { .. } | PropertyValue::ImplicitGeometry { .. }
        )
    }

    /// Whether this property owns a nested feature.
    #[must_use]
    pub fn is_contained_feature(&self) -> bool {
        matches!(
            self.value,
            PropertyValue::Feature {
                relation: RelationType::Contains,
                ..
            }
        )
    }

    /// Link carried by the property; attributes have none.
    #[must_use]
    pub fn link(&self) -> Option<&Link> {
        match &self.value {
            PropertyValue::Attribute { .. } => None,
            PropertyValue::Geometry { link, .. }
            | PropertyValue::ImplicitGeometry { link, .. }
            | PropertyValue::Feature { link, .. }
            | PropertyValue::Appearance { link }
            | PropertyValue::Address { link } => Some(link),
        }
    }

    /// Mutable access to the carried link.
    pub fn link_mut(&mut self) -> Option<&mut Link> {
        match &mut self.value {
            PropertyValue::Attribute { .. } => None,
            PropertyValue::Geometry { link, .. }
            | PropertyValue::ImplicitGeometry { link, .. }
            | PropertyValue::Feature { link, .. }
            | PropertyValue::Appearance { link }
            | PropertyValue::Address { link } => Some(link),
        }
    }
}

/// City-model object with attributes, geometries and nested features.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Feature {
    /// Qualified type.
    pub feature_type: FeatureType,
    /// Derived bounding box.
    #[cfg_attr(feature = "serde", serde(default))]
    pub envelope: Envelope,
    /// Start of the validity window as a Unix timestamp.
    #[cfg_attr(feature = "serde", serde(default))]
    pub creation_date: Option<i64>,
    /// End of the validity window as a Unix timestamp.
    #[cfg_attr(feature = "serde", serde(default))]
    pub termination_date: Option<i64>,
    /// Properties in document order.
    #[cfg_attr(feature = "serde", serde(default))]
    pub properties: Vec<Property>,
}

impl Feature {
    /// Feature with no properties.
    #[must_use]
    pub fn new(feature_type: FeatureType) -> Self {
        Self {
            feature_type,
            envelope: Envelope::empty(),
            creation_date: None,
            termination_date: None,
            properties: Vec::new(),
        }
    }

    /// Whether any geometry or implicit-geometry property remains.
    #[must_use]
    pub fn has_spatial_properties(&self) -> bool {
        self.properties.iter().any(Property::is_spatial)
    }

    /// Whether any owned nested feature remains.
    #[must_use]
    pub fn has_contained_features(&self) -> bool {
        self.properties.iter().any(Property::is_contained_feature)
    }

    /// Whether the feature is valid at `instant`.
    ///
    /// Without an instant, a feature is valid while it has no termination
    /// date.
    #[must_use]
    pub fn is_valid_at(&self, instant: Option<i64>) -> bool {
        match instant {
            None => self.termination_date.is_none(),
            Some(at) => {
                self.creation_date.is_none_or(|created| created <= at)
                    && self.termination_date.is_none_or(|terminated| terminated > at)
            }
        }
    }
}
