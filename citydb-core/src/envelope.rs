//! Axis-aligned 3D bounding boxes.
//!
//! An [`Envelope`] is derived data: it is recomputed from geometry content
//! whenever geometry changes and never treated as authoritative. The empty
//! envelope is a distinct state rather than a degenerate box at the origin.

use glam::{DMat4, DVec3};
use rstar::AABB;
use rstar::Envelope as _;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box with an optional spatial reference id.
///
/// # Examples
/// ```
/// use glam::DVec3;
/// use citydb_core::Envelope;
///
/// let mut envelope = Envelope::empty();
/// assert!(envelope.is_empty());
///
/// envelope.include(&Envelope::new(DVec3::ZERO, DVec3::ONE));
/// envelope.include_point(DVec3::new(3.0, 3.0, 3.0));
/// assert_eq!(envelope.upper(), Some(DVec3::new(3.0, 3.0, 3.0)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Envelope {
    #[cfg_attr(feature = "serde", serde(default))]
    bounds: Option<AABB<[f64; 3]>>,
    #[cfg_attr(feature = "serde", serde(default))]
    srid: Option<i32>,
}

impl Envelope {
    /// The empty envelope. Including it into another envelope is a no-op.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            bounds: None,
            srid: None,
        }
    }

    /// Build an envelope from two corners; the corners are normalised so the
    /// order of the arguments does not matter.
    #[must_use]
    pub fn new(lower: DVec3, upper: DVec3) -> Self {
        Self {
            bounds: Some(AABB::from_corners(lower.to_array(), upper.to_array())),
            srid: None,
        }
    }

    /// Envelope covering a single point.
    #[must_use]
    pub fn from_point(point: DVec3) -> Self {
        Self {
            bounds: Some(AABB::from_point(point.to_array())),
            srid: None,
        }
    }

    /// Attach a spatial reference id.
    #[must_use]
    pub const fn with_srid(mut self, srid: Option<i32>) -> Self {
        self.srid = srid;
        self
    }

    /// Spatial reference id, if known.
    #[must_use]
    pub const fn srid(&self) -> Option<i32> {
        self.srid
    }

    /// Whether no coordinate has been included yet.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }

    /// Lower corner, or `None` when empty.
    #[must_use]
    pub fn lower(&self) -> Option<DVec3> {
        self.bounds.map(|bounds| DVec3::from_array(bounds.lower()))
    }

    /// Upper corner, or `None` when empty.
    #[must_use]
    pub fn upper(&self) -> Option<DVec3> {
        self.bounds.map(|bounds| DVec3::from_array(bounds.upper()))
    }

    /// Grow this envelope to cover `other`.
    ///
    /// The SRID of `self` wins; it is only taken from `other` when `self` has
    /// none.
    pub fn include(&mut self, other: &Self) -> &mut Self {
        if let Some(theirs) = other.bounds {
            self.bounds = Some(match self.bounds {
                Some(ours) => ours.merged(&theirs),
                None => theirs,
            });
            if self.srid.is_none() {
                self.srid = other.srid;
            }
        }
        self
    }

    /// Grow this envelope to cover `point`.
    pub fn include_point(&mut self, point: DVec3) -> &mut Self {
        let other = AABB::from_point(point.to_array());
        self.bounds = Some(match self.bounds {
            Some(ours) => ours.merged(&other),
            None => other,
        });
        self
    }

    /// Whether `point` lies inside or on the boundary of this envelope.
    #[must_use]
    pub fn contains_point(&self, point: DVec3) -> bool {
        self.bounds
            .is_some_and(|bounds| bounds.contains_point(&point.to_array()))
    }

    /// The eight corners of the box; empty envelopes have none.
    #[must_use]
    pub fn corners(&self) -> Vec<DVec3> {
        let (Some(lower), Some(upper)) = (self.lower(), self.upper()) else {
            return Vec::new();
        };
        let mut corners = Vec::with_capacity(8);
        for x in [lower.x, upper.x] {
            for y in [lower.y, upper.y] {
                for z in [lower.z, upper.z] {
                    corners.push(DVec3::new(x, y, z));
                }
            }
        }
        corners
    }

    /// Apply an affine transformation and return the envelope of the
    /// transformed corners. The SRID is left untouched.
    #[must_use]
    pub fn transform(&self, matrix: &DMat4) -> Self {
        let mut transformed = Self::empty().with_srid(self.srid);
        for corner in self.corners() {
            transformed.include_point(matrix.transform_point3(corner));
        }
        transformed
    }
}
