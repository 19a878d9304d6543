//! "Already seen" deduplication keyed by object id.

use std::collections::{HashMap, HashSet};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Deduplication categories.
///
/// The same categories drive the sequence pre-count and the per-call
/// reference caches of the transfer contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CacheType {
    /// Features.
    Feature,
    /// Explicit geometries.
    Geometry,
    /// Implicit geometry templates.
    ImplicitGeometry,
    /// Addresses.
    Address,
    /// Materials and textures.
    SurfaceData,
    /// External texture images.
    TextureImage,
}

impl CacheType {
    /// Every category, in a stable order.
    pub const ALL: [Self; 6] = [
        Self::Feature,
        Self::Geometry,
        Self::ImplicitGeometry,
        Self::Address,
        Self::SurfaceData,
        Self::TextureImage,
    ];

    /// Human-readable name.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Geometry => "geometry",
            Self::ImplicitGeometry => "implicit geometry",
            Self::Address => "address",
            Self::SurfaceData => "surface data",
            Self::TextureImage => "texture image",
        }
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-call set of object ids already queued for serialization.
///
/// The cache lives for one export or import call and is cleared afterwards;
/// object ids are only unique within one graph traversal.
///
/// # Examples
/// ```
/// use citydb_core::{CacheType, ReferenceCache};
///
/// let mut cache = ReferenceCache::default();
/// assert!(!cache.lookup_and_put(CacheType::Address, "addr-1"));
/// assert!(cache.lookup_and_put(CacheType::Address, "addr-1"));
/// assert!(!cache.lookup_and_put(CacheType::Feature, "addr-1"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReferenceCache {
    seen: HashMap<CacheType, HashSet<String>>,
}

impl ReferenceCache {
    /// Test and insert in one step.
    ///
    /// Returns `true` when `object_id` was already present, meaning the caller
    /// must not serialize or descend again.
    pub fn lookup_and_put(&mut self, cache_type: CacheType, object_id: &str) -> bool {
        let set = self.seen.entry(cache_type).or_default();
        if set.contains(object_id) {
            true
        } else {
            set.insert(object_id.to_owned());
            false
        }
    }

    /// Whether `object_id` was recorded for `cache_type`.
    #[must_use]
    pub fn contains(&self, cache_type: CacheType, object_id: &str) -> bool {
        self.seen
            .get(&cache_type)
            .is_some_and(|set| set.contains(object_id))
    }

    /// Number of ids recorded across all categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.values().map(HashSet::len).sum()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn categories_are_independent() {
        let mut cache = ReferenceCache::default();
        for cache_type in CacheType::ALL {
            assert!(!cache.lookup_and_put(cache_type, "shared"));
        }
        assert_eq!(cache.len(), CacheType::ALL.len());
    }

    #[rstest]
    fn clear_forgets_everything() {
        let mut cache = ReferenceCache::default();
        cache.lookup_and_put(CacheType::TextureImage, "roof.png");
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.contains(CacheType::TextureImage, "roof.png"));
    }
}
