//! Two-pass primary-key pre-allocation.
//!
//! Pass one walks the graph in document order and counts how many rows of
//! each kind a write would produce, resolving deduplication by object id as it
//! goes. Pass two issues one batched request per sequence. The write pass then
//! pops values off per-sequence FIFO queues while building a [`WritePlan`].
//!
//! Counting and consumption must agree exactly: popping from an empty queue
//! or leaving values behind is an invariant violation, never tolerated.

mod plan;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;

use log::debug;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapter::{AdapterError, ImplicitGeometryLookup, SequenceSource};
use crate::cache::CacheType;
use crate::model::{FeatureGraph, Link, NodeId, NodeKind, PropertyValue};

pub use plan::{
    AddressRow, AppearToSurfaceDataRow, AppearanceRow, FeatureRow, GeometryRow,
    ImplicitGeometryRow, PlanError, PlannedTarget, PlannedValue, PropertyRow, SurfaceDataMappingRow,
    SurfaceDataRow, TexImageRow, WritePlan,
};

/// Logical counter categories, one per persisted entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Sequence {
    /// Feature rows.
    Feature,
    /// Explicit geometry rows.
    GeometryData,
    /// Implicit geometry template rows.
    ImplicitGeometry,
    /// Appearance rows.
    Appearance,
    /// Material and texture rows.
    SurfaceData,
    /// Address rows.
    Address,
    /// Property rows.
    Property,
    /// Texture image rows.
    TexImage,
    /// Appearance to surface data link rows.
    AppearToSurfaceData,
}

impl Sequence {
    /// Every sequence, in a stable order.
    pub const ALL: [Self; 9] = [
        Self::Feature,
        Self::GeometryData,
        Self::ImplicitGeometry,
        Self::Appearance,
        Self::SurfaceData,
        Self::Address,
        Self::Property,
        Self::TexImage,
        Self::AppearToSurfaceData,
    ];

    /// Backend name of the sequence.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Feature => "feature_seq",
            Self::GeometryData => "geometry_data_seq",
            Self::ImplicitGeometry => "implicit_geometry_seq",
            Self::Appearance => "appearance_seq",
            Self::SurfaceData => "surface_data_seq",
            Self::Address => "address_seq",
            Self::Property => "property_seq",
            Self::TexImage => "tex_image_seq",
            Self::AppearToSurfaceData => "appear_to_surface_data_seq",
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Allocation and consumption failures.
#[derive(Debug, Error)]
pub enum SequenceError {
    /// The write pass asked for more values than were counted.
    #[error("sequence {sequence} is exhausted; the counting pass undercounted")]
    Exhausted {
        /// Sequence that ran dry.
        sequence: Sequence,
    },
    /// Values were allocated but the write pass never used them.
    #[error("{remaining} value(s) of sequence {sequence} were allocated but never consumed")]
    Unconsumed {
        /// Sequence with leftovers.
        sequence: Sequence,
        /// Number of unused values.
        remaining: usize,
    },
    /// The sequence source returned fewer values than requested.
    #[error("sequence {sequence} returned {actual} value(s), expected {expected}")]
    ShortAllocation {
        /// Sequence that was asked.
        sequence: Sequence,
        /// Requested count.
        expected: usize,
        /// Delivered count.
        actual: usize,
    },
    /// The sequence source failed.
    #[error("failed to allocate {count} value(s) of sequence {sequence}")]
    Source {
        /// Sequence that was asked.
        sequence: Sequence,
        /// Requested count.
        count: usize,
        /// Backend error.
        #[source]
        source: AdapterError,
    },
    /// Looking up an existing implicit geometry failed.
    #[error("failed to look up implicit geometry {object_id}")]
    Lookup {
        /// Object id that was looked up.
        object_id: String,
        /// Backend error.
        #[source]
        source: AdapterError,
    },
}

/// Whether a visit is the first occurrence of an object id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visit {
    /// First occurrence; a fresh row is needed.
    First,
    /// Repeat occurrence of the given object id; it is a reference.
    Repeat(String),
}

/// Result of the counting pass.
#[derive(Debug, Clone, Default)]
pub struct SequenceCount {
    counts: BTreeMap<Sequence, usize>,
    seen: HashMap<CacheType, HashSet<String>>,
    existing_implicit: HashMap<String, i64>,
}

impl SequenceCount {
    /// Values needed for `sequence`.
    #[must_use]
    pub fn get(&self, sequence: Sequence) -> usize {
        self.counts.get(&sequence).copied().unwrap_or_default()
    }

    /// Values needed across all sequences.
    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// First-occurrence object ids recorded for `cache_type`.
    #[must_use]
    pub fn first_occurrences(&self, cache_type: CacheType) -> usize {
        self.seen.get(&cache_type).map_or(0, HashSet::len)
    }

    /// Database id of an implicit geometry that already exists.
    #[must_use]
    pub fn existing_implicit_geometry(&self, object_id: &str) -> Option<i64> {
        self.existing_implicit.get(object_id).copied()
    }

    fn increment(&mut self, sequence: Sequence) {
        *self.counts.entry(sequence).or_default() += 1;
    }

    fn is_first(&mut self, cache_type: CacheType, object_id: Option<&str>) -> bool {
        object_id.is_none_or(|id| self.seen.entry(cache_type).or_default().insert(id.to_owned()))
    }
}

/// Pre-fetched values and first-occurrence sets for one traversal.
#[derive(Debug, Clone, Default)]
pub struct SequenceValues {
    queues: HashMap<Sequence, VecDeque<i64>>,
    first_occurrences: HashMap<CacheType, HashSet<String>>,
    existing_implicit: HashMap<String, i64>,
}

impl SequenceValues {
    /// Pop the next value of `sequence`.
    ///
    /// # Errors
    /// Returns [`SequenceError::Exhausted`] when no value is left.
    pub fn next_value(&mut self, sequence: Sequence) -> Result<i64, SequenceError> {
        self.queues
            .get_mut(&sequence)
            .and_then(VecDeque::pop_front)
            .ok_or(SequenceError::Exhausted { sequence })
    }

    /// Whether `object_id` was a first occurrence during counting.
    ///
    /// The id is removed on the first ask, so a later ask for the same id
    /// answers `false`. Nodes without an object id are always first
    /// occurrences.
    pub fn has_value_for(&mut self, cache_type: CacheType, object_id: Option<&str>) -> bool {
        object_id.is_none_or(|id| {
            self.first_occurrences
                .get_mut(&cache_type)
                .is_some_and(|set| set.remove(id))
        })
    }

    /// [`SequenceValues::has_value_for`] returning the repeated id.
    pub fn visit(&mut self, cache_type: CacheType, object_id: Option<&str>) -> Visit {
        match object_id {
            Some(id) if !self.has_value_for(cache_type, Some(id)) => Visit::Repeat(id.to_owned()),
            _ => Visit::First,
        }
    }

    /// Database id of an implicit geometry that already exists.
    #[must_use]
    pub fn existing_implicit_geometry(&self, object_id: &str) -> Option<i64> {
        self.existing_implicit.get(object_id).copied()
    }

    /// Values left in `sequence`.
    #[must_use]
    pub fn remaining(&self, sequence: Sequence) -> usize {
        self.queues.get(&sequence).map_or(0, VecDeque::len)
    }

    /// Check that every allocated value was consumed.
    ///
    /// # Errors
    /// Returns [`SequenceError::Unconsumed`] for the first sequence with
    /// leftovers.
    pub fn ensure_consumed(&self) -> Result<(), SequenceError> {
        for sequence in Sequence::ALL {
            let remaining = self.remaining(sequence);
            if remaining > 0 {
                return Err(SequenceError::Unconsumed {
                    sequence,
                    remaining,
                });
            }
        }
        Ok(())
    }
}

/// Two-pass allocator bound to the backend collaborators.
///
/// # Examples
/// ```
/// use citydb_core::test_support::{GraphBuilder, MemoryImplicitGeometries, MemorySequences};
/// use citydb_core::{Sequence, SequenceAllocator};
///
/// let mut builder = GraphBuilder::building("b1");
/// let root = builder.root();
/// builder.address(root, "a1");
/// builder.address(root, "a1");
/// let graph = builder.finish();
///
/// let sequences = MemorySequences::default();
/// let lookup = MemoryImplicitGeometries::default();
/// let count = SequenceAllocator::new(&sequences, &lookup)
///     .count(&graph)
///     .expect("count");
/// assert_eq!(count.get(Sequence::Address), 1);
/// assert_eq!(count.get(Sequence::Property), 2);
/// ```
pub struct SequenceAllocator<'a> {
    source: &'a dyn SequenceSource,
    lookup: &'a dyn ImplicitGeometryLookup,
}

impl fmt::Debug for SequenceAllocator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceAllocator").finish_non_exhaustive()
    }
}

impl<'a> SequenceAllocator<'a> {
    /// Bind the allocator to its collaborators.
    pub fn new(source: &'a dyn SequenceSource, lookup: &'a dyn ImplicitGeometryLookup) -> Self {
        Self { source, lookup }
    }

    /// Count and allocate in one go.
    ///
    /// # Errors
    /// Propagates counting and allocation failures.
    pub fn prepare(&self, graph: &FeatureGraph) -> Result<SequenceValues, SequenceError> {
        let count = self.count(graph)?;
        self.allocate(count)
    }

    /// Pass one: count the values each sequence needs.
    ///
    /// # Errors
    /// Fails when the implicit geometry lookup fails.
    pub fn count(&self, graph: &FeatureGraph) -> Result<SequenceCount, SequenceError> {
        let mut walk = CountWalk {
            graph,
            lookup: self.lookup,
            count: SequenceCount::default(),
            visited: HashSet::new(),
        };
        if let Some(root) = graph.root() {
            walk.node(root)?;
        }
        Ok(walk.count)
    }

    /// Pass two: one batched request per non-empty sequence.
    ///
    /// # Errors
    /// Fails when the source errors or returns too few values.
    pub fn allocate(&self, count: SequenceCount) -> Result<SequenceValues, SequenceError> {
        let mut queues = HashMap::new();
        for (&sequence, &needed) in &count.counts {
            if needed == 0 {
                continue;
            }
            let values = self
                .source
                .next_values(sequence, needed)
                .map_err(|source| SequenceError::Source {
                    sequence,
                    count: needed,
                    source,
                })?;
            if values.len() != needed {
                return Err(SequenceError::ShortAllocation {
                    sequence,
                    expected: needed,
                    actual: values.len(),
                });
            }
            debug!("allocated {needed} value(s) of {sequence}");
            queues.insert(sequence, VecDeque::from(values));
        }
        Ok(SequenceValues {
            queues,
            first_occurrences: count.seen,
            existing_implicit: count.existing_implicit,
        })
    }
}

struct CountWalk<'g> {
    graph: &'g FeatureGraph,
    lookup: &'g dyn ImplicitGeometryLookup,
    count: SequenceCount,
    visited: HashSet<NodeId>,
}

impl CountWalk<'_> {
    fn node(&mut self, id: NodeId) -> Result<(), SequenceError> {
        if !self.visited.insert(id) {
            return Ok(());
        }
        let Some(node) = self.graph.get(id) else {
            return Ok(());
        };
        let object_id = node.object_id.as_deref();
        match &node.kind {
            NodeKind::Feature(feature) => {
                if !self.count.is_first(CacheType::Feature, object_id) {
                    return Ok(());
                }
                self.count.increment(Sequence::Feature);
                for property in &feature.properties {
                    self.count.increment(Sequence::Property);
                    if let PropertyValue::Attribute { .. } = property.value {
                        continue;
                    }
                    if let Some(child) = property.link().and_then(Link::inline) {
                        self.node(child)?;
                    }
                }
            }
            NodeKind::Geometry(_) => {
                if self.count.is_first(CacheType::Geometry, object_id) {
                    self.count.increment(Sequence::GeometryData);
                }
            }
            NodeKind::ImplicitGeometry(implicit) => {
                if !self.count.is_first(CacheType::ImplicitGeometry, object_id) {
                    return Ok(());
                }
                if let Some(object_id) = object_id {
                    let existing = self
                        .lookup
                        .find_implicit_geometry(object_id)
                        .map_err(|source| SequenceError::Lookup {
                            object_id: object_id.to_owned(),
                            source,
                        })?;
                    if let Some(database_id) = existing {
                        self.count
                            .existing_implicit
                            .insert(object_id.to_owned(), database_id);
                        return Ok(());
                    }
                }
                self.count.increment(Sequence::ImplicitGeometry);
                if let Some(template) = implicit.relative_geometry {
                    self.node(template)?;
                }
            }
            NodeKind::Appearance(appearance) => {
                self.count.increment(Sequence::Appearance);
                for link in &appearance.surface_data {
                    self.count.increment(Sequence::AppearToSurfaceData);
                    if let Some(child) = link.inline() {
                        self.node(child)?;
                    }
                }
            }
            NodeKind::SurfaceData(data) => {
                if !self.count.is_first(CacheType::SurfaceData, object_id) {
                    return Ok(());
                }
                self.count.increment(Sequence::SurfaceData);
                let image = data
                    .kind
                    .texture()
                    .and_then(|texture| texture.image.as_ref())
                    .and_then(Link::inline);
                if let Some(image) = image {
                    self.node(image)?;
                }
            }
            NodeKind::TextureImage(_) => {
                if self.count.is_first(CacheType::TextureImage, object_id) {
                    self.count.increment(Sequence::TexImage);
                }
            }
            NodeKind::Address(_) => {
                if self.count.is_first(CacheType::Address, object_id) {
                    self.count.increment(Sequence::Address);
                }
            }
        }
        Ok(())
    }
}
