//! Level-of-detail pruning.
//!
//! [`LodFilter::filter`] is the per-property predicate used while a graph is
//! streamed in; [`LodFilter::remove_geometries`] is the batch form that needs
//! the whole feature first. Every detachment is recorded in a [`PruneLog`]
//! whose `has_removed_geometry` flag gates the cascading cleanup.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::model::{FeatureGraph, Link, NodeId, PropertyValue, RelationType};

/// Level-of-detail tag, `lod0` to `lod4`.
///
/// # Examples
/// ```
/// use citydb_core::Lod;
///
/// let lod: Lod = "lod2".parse().expect("valid tag");
/// assert_eq!(lod, Lod::new(2).expect("in range"));
/// assert_eq!(lod.to_string(), "lod2");
/// assert!("lod7".parse::<Lod>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct Lod(u8);

impl Lod {
    /// Highest supported level.
    pub const MAX: u8 = 4;

    /// Validate and wrap a numeric level.
    ///
    /// # Errors
    /// Returns [`GraphError::InvalidLod`] for levels above [`Lod::MAX`].
    pub fn new(level: u8) -> Result<Self, GraphError> {
        if level <= Self::MAX {
            Ok(Self(level))
        } else {
            Err(GraphError::InvalidLod(level.to_string()))
        }
    }

    /// Numeric level.
    #[must_use]
    pub const fn level(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Lod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lod{}", self.0)
    }
}

impl FromStr for Lod {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("lod")
            .or_else(|| trimmed.strip_prefix("LOD"))
            .unwrap_or(trimmed);
        digits
            .parse::<u8>()
            .map_err(|_| GraphError::InvalidLod(s.to_owned()))
            .and_then(|level| Self::new(level).map_err(|_| GraphError::InvalidLod(s.to_owned())))
    }
}

impl TryFrom<u8> for Lod {
    type Error = GraphError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Lod> for u8 {
    fn from(value: Lod) -> Self {
        value.0
    }
}

/// Filtering policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum LodMode {
    /// Keep only the listed levels; an empty list keeps everything.
    #[default]
    Keep,
    /// Drop the listed levels.
    Remove,
    /// Keep only the lowest level present.
    Minimum,
    /// Keep only the highest level present.
    Maximum,
}

impl FromStr for LodMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "remove" => Ok(Self::Remove),
            "minimum" | "min" => Ok(Self::Minimum),
            "maximum" | "max" => Ok(Self::Maximum),
            other => Err(format!("unknown LOD mode {other:?}")),
        }
    }
}

/// Record of what LOD pruning detached during one call.
#[derive(Debug, Clone, Default)]
pub struct PruneLog {
    removed_geometry: bool,
    removed: usize,
    pruned_features: HashSet<NodeId>,
    detached_geometries: HashSet<NodeId>,
    detached_implicit: HashSet<NodeId>,
}

impl PruneLog {
    /// Note that `feature` lost a spatial property pointing at `link`.
    pub fn record(&mut self, feature: NodeId, link: &Link, implicit: bool) {
        self.mark_removed(feature);
        if let Some(target) = link.inline() {
            if implicit {
                self.detached_implicit.insert(target);
            } else {
                self.detached_geometries.insert(target);
            }
        }
    }

    /// Note that `feature` lost a spatial property that was never
    /// materialized, as happens when readers skip filtered properties.
    pub fn mark_removed(&mut self, feature: NodeId) {
        self.removed_geometry = true;
        self.removed += 1;
        self.pruned_features.insert(feature);
    }

    /// Whether any spatial property was detached.
    #[must_use]
    pub const fn has_removed_geometry(&self) -> bool {
        self.removed_geometry
    }

    /// Number of spatial properties detached.
    #[must_use]
    pub const fn removed(&self) -> usize {
        self.removed
    }

    /// Features that lost at least one spatial property.
    #[must_use]
    pub const fn pruned_features(&self) -> &HashSet<NodeId> {
        &self.pruned_features
    }

    /// Geometries that were owned by a detached property.
    #[must_use]
    pub const fn detached_geometries(&self) -> &HashSet<NodeId> {
        &self.detached_geometries
    }

    /// Implicit geometries that were owned by a detached property.
    #[must_use]
    pub const fn detached_implicit_geometries(&self) -> &HashSet<NodeId> {
        &self.detached_implicit
    }

    /// Reset for the next call.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Level-of-detail policy.
///
/// The default keeps every level.
///
/// # Examples
/// ```
/// use citydb_core::{Lod, LodFilter, LodMode};
///
/// let lod = |level| Lod::new(level).expect("in range");
/// let keep_lod2 = LodFilter::new(LodMode::Keep, [lod(2)]);
/// assert!(keep_lod2.filter(Some(lod(2))));
/// assert!(!keep_lod2.filter(Some(lod(1))));
/// assert!(keep_lod2.filter(None));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LodFilter {
    /// Policy.
    pub mode: LodMode,
    /// Levels the policy refers to.
    pub lods: BTreeSet<Lod>,
    /// How many levels of nested features share one target level under
    /// `Minimum` and `Maximum`; `None` means the whole subtree.
    pub search_depth: Option<u32>,
}

impl LodFilter {
    /// Filter with the given mode and levels and an unbounded search depth.
    pub fn new(mode: LodMode, lods: impl IntoIterator<Item = Lod>) -> Self {
        Self {
            mode,
            lods: lods.into_iter().collect(),
            search_depth: None,
        }
    }

    /// Limit the nesting depth searched for the target level.
    #[must_use]
    pub const fn with_search_depth(mut self, depth: Option<u32>) -> Self {
        self.search_depth = depth;
        self
    }

    /// Whether the filter can never remove anything.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self.mode, LodMode::Keep | LodMode::Remove) && self.lods.is_empty()
    }

    /// Whether the whole feature must be seen before deciding.
    #[must_use]
    pub const fn requires_post_filter(&self) -> bool {
        matches!(self.mode, LodMode::Minimum | LodMode::Maximum)
    }

    /// Per-property predicate. Untagged properties always pass.
    ///
    /// Under `Minimum` and `Maximum` this only applies the allowed set; the
    /// final decision is made by [`LodFilter::remove_geometries`].
    #[must_use]
    pub fn filter(&self, lod: Option<Lod>) -> bool {
        let Some(lod) = lod else {
            return true;
        };
        match self.mode {
            LodMode::Remove => !self.lods.contains(&lod),
            LodMode::Keep | LodMode::Minimum | LodMode::Maximum => {
                self.lods.is_empty() || self.lods.contains(&lod)
            }
        }
    }

    /// Detach every geometry and implicit-geometry property under `feature`
    /// that the policy rejects.
    ///
    /// Returns the number of detached properties.
    ///
    /// # Errors
    /// Fails when `feature` or a nested feature link does not resolve to a
    /// feature node.
    pub fn remove_geometries(
        &self,
        graph: &mut FeatureGraph,
        feature: NodeId,
        log: &mut PruneLog,
    ) -> Result<usize, GraphError> {
        if self.is_noop() {
            return Ok(0);
        }
        let before = log.removed();
        if self.requires_post_filter() {
            let mut groups = vec![feature];
            while let Some(start) = groups.pop() {
                let (scope, next) = self.scope(graph, start)?;
                let target = self.target_lod(graph, &scope)?;
                for id in scope {
                    detach_where(graph, id, log, |lod| lod != target)?;
                }
                groups.extend(next);
            }
        } else {
            let mut groups = vec![feature];
            while let Some(start) = groups.pop() {
                let (scope, related) = nested_features(graph, start, None)?;
                for id in scope {
                    detach_where(graph, id, log, |lod| !self.filter(lod))?;
                }
                groups.extend(related);
            }
        }
        Ok(log.removed() - before)
    }

    fn scope(
        &self,
        graph: &FeatureGraph,
        start: NodeId,
    ) -> Result<(Vec<NodeId>, Vec<NodeId>), GraphError> {
        nested_features(graph, start, self.search_depth)
    }

    /// Smallest or largest allowed level among `scope`, `None` when no
    /// allowed level is present.
    fn target_lod(&self, graph: &FeatureGraph, scope: &[NodeId]) -> Result<Option<Lod>, GraphError> {
        let mut present = BTreeSet::new();
        for id in scope {
            for property in &graph.feature(*id)?.properties {
                if let Some(lod) = property.lod()
                    && (self.lods.is_empty() || self.lods.contains(&lod))
                {
                    present.insert(lod);
                }
            }
        }
        Ok(match self.mode {
            LodMode::Minimum => present.first().copied(),
            LodMode::Maximum => present.last().copied(),
            LodMode::Keep | LodMode::Remove => None,
        })
    }
}

/// Features contained in `start` up to `depth` levels down, plus the
/// features that start a scope of their own: those just beyond that depth
/// and inline related features.
fn nested_features(
    graph: &FeatureGraph,
    start: NodeId,
    depth: Option<u32>,
) -> Result<(Vec<NodeId>, Vec<NodeId>), GraphError> {
    let mut scope = Vec::new();
    let mut beyond = Vec::new();
    let mut stack = vec![(start, 0_u32)];
    while let Some((id, level)) = stack.pop() {
        if depth.is_some_and(|limit| level > limit) {
            beyond.push(id);
            continue;
        }
        scope.push(id);
        for property in &graph.feature(id)?.properties {
            match &property.value {
                PropertyValue::Feature {
                    relation: RelationType::Contains,
                    link: Link::Inline(child),
                } => stack.push((*child, level.saturating_add(1))),
                PropertyValue::Feature {
                    link: Link::Inline(child),
                    ..
                } => beyond.push(*child),
                _ => {}
            }
        }
    }
    Ok((scope, beyond))
}

/// Detach tagged spatial properties of `feature` for which `reject` holds.
fn detach_where(
    graph: &mut FeatureGraph,
    feature: NodeId,
    log: &mut PruneLog,
    reject: impl Fn(Option<Lod>) -> bool,
) -> Result<(), GraphError> {
    let properties = std::mem::take(&mut graph.feature_mut(feature)?.properties);
    let mut kept = Vec::with_capacity(properties.len());
    for property in properties {
        let lod = property.lod();
        let removable = property.is_spatial() && lod.is_some() && reject(lod);
        if removable {
            let implicit = matches!(property.value, PropertyValue::ImplicitGeometry { .. });
            if let Some(link) = property.link() {
                log.record(feature, link, implicit);
            }
        } else {
            kept.push(property);
        }
    }
    graph.feature_mut(feature)?.properties = kept;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::GraphBuilder;
    use rstest::rstest;

    fn lod(level: u8) -> Lod {
        Lod::new(level).expect("valid level")
    }

    fn lods_of(graph: &FeatureGraph, feature: NodeId) -> Vec<u8> {
        graph
            .feature(feature)
            .expect("feature")
            .properties
            .iter()
            .filter_map(|property| property.lod().map(Lod::level))
            .collect()
    }

    #[rstest]
    #[case(LodMode::Keep, vec![2], Some(2), true)]
    #[case(LodMode::Keep, vec![2], Some(3), false)]
    #[case(LodMode::Keep, vec![], Some(3), true)]
    #[case(LodMode::Remove, vec![2], Some(2), false)]
    #[case(LodMode::Remove, vec![2], Some(1), true)]
    #[case(LodMode::Remove, vec![2], None, true)]
    fn streaming_predicate(
        #[case] mode: LodMode,
        #[case] levels: Vec<u8>,
        #[case] tag: Option<u8>,
        #[case] expected: bool,
    ) {
        let filter = LodFilter::new(mode, levels.into_iter().map(lod));
        assert_eq!(filter.filter(tag.map(lod)), expected);
    }

    #[rstest]
    #[case("2", 2)]
    #[case("lod3", 3)]
    #[case(" LOD0 ", 0)]
    fn parses_tags(#[case] input: &str, #[case] level: u8) {
        assert_eq!(input.parse::<Lod>().expect("valid"), lod(level));
    }

    #[rstest]
    fn minimum_keeps_lowest_level_across_subtree() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        builder.geometry(root, "g1", Some(2));
        builder.geometry(root, "g2", Some(3));
        let part = builder.part(root, "p1");
        builder.geometry(part, "g3", Some(1));
        builder.geometry(part, "g4", None);
        let mut graph = builder.finish();

        let mut log = PruneLog::default();
        let removed = LodFilter::new(LodMode::Minimum, [])
            .remove_geometries(&mut graph, root, &mut log)
            .expect("prunes");

        assert_eq!(removed, 2);
        assert!(lods_of(&graph, root).is_empty());
        assert_eq!(lods_of(&graph, part), vec![1]);
        assert!(log.has_removed_geometry());
        assert_eq!(log.detached_geometries().len(), 2);
    }

    #[rstest]
    fn search_depth_zero_decides_per_feature() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        builder.geometry(root, "g1", Some(2));
        builder.geometry(root, "g2", Some(3));
        let part = builder.part(root, "p1");
        builder.geometry(part, "g3", Some(1));
        let mut graph = builder.finish();

        LodFilter::new(LodMode::Maximum, Vec::<Lod>::new())
            .with_search_depth(Some(0))
            .remove_geometries(&mut graph, root, &mut PruneLog::default())
            .expect("prunes");

        assert_eq!(lods_of(&graph, root), vec![3]);
        assert_eq!(lods_of(&graph, part), vec![1]);
    }

    #[rstest]
    fn related_features_choose_their_own_level() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        builder.geometry(root, "g1", Some(1));
        let related = builder.related(root, "r1");
        builder.geometry(related, "g2", Some(1));
        builder.geometry(related, "g3", Some(3));
        let mut graph = builder.finish();

        LodFilter::new(LodMode::Maximum, Vec::<Lod>::new())
            .remove_geometries(&mut graph, root, &mut PruneLog::default())
            .expect("prunes");

        assert_eq!(lods_of(&graph, root), vec![1]);
        assert_eq!(lods_of(&graph, related), vec![3]);
    }

    #[rstest]
    fn no_allowed_level_removes_all_tagged() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        builder.geometry(root, "g1", Some(1));
        builder.geometry(root, "g2", None);
        let mut graph = builder.finish();

        LodFilter::new(LodMode::Minimum, [lod(4)])
            .remove_geometries(&mut graph, root, &mut PruneLog::default())
            .expect("prunes");

        let properties = &graph.feature(root).expect("feature").properties;
        assert_eq!(properties.len(), 1);
        assert_eq!(properties.first().and_then(|p| p.lod()), None);
    }

    #[rstest]
    fn noop_filter_leaves_log_untouched() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        builder.geometry(root, "g1", Some(1));
        let mut graph = builder.finish();
        let mut log = PruneLog::default();

        LodFilter::default()
            .remove_geometries(&mut graph, root, &mut log)
            .expect("prunes");

        assert!(!log.has_removed_geometry());
    }
}
