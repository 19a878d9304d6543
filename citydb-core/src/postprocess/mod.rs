//! Graph cleanup after materialization (export) or before persistence
//! (import).
//!
//! [`Postprocessor::process`] runs, in order:
//!
//! 1. LOD pruning through [`LodFilter::remove_geometries`].
//! 2. When pruning removed geometry: empty features are detached and
//!    references to pruned geometries are rehydrated.
//! 3. Appearance linkage: surface data targets are resolved against the live
//!    geometries and unresolvable targets are dropped.
//! 4. When pruning removed geometry, the rest of the cascade: empty surface
//!    data, dangling references, empty appearances, envelopes.
//! 5. Envelope recomputation on import even when nothing was pruned.
//! 6. Stable ordering of properties by name.

mod appearance;
mod cascade;
mod envelope;

use std::collections::{BTreeSet, HashSet};

use log::debug;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::lod::{LodFilter, PruneLog};
use crate::model::{FeatureGraph, NodeKind, PropertyValue};

pub use appearance::{AppearanceLinkage, link_appearances};
pub use envelope::compute_envelopes;

/// Which way the graph is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Direction {
    /// Database to model.
    Export,
    /// Model to database.
    Import,
}

/// What one [`Postprocessor::process`] call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostprocessReport {
    /// Spatial properties detached by LOD pruning.
    pub removed_geometries: usize,
    /// Object ids of features detached because they became empty.
    pub removed_features: BTreeSet<String>,
    /// Object ids of surface data detached because they target nothing.
    pub removed_surface_data: BTreeSet<String>,
    /// Appearances detached because they hold no surface data.
    pub removed_appearances: usize,
    /// Appearance properties stripped because appearances are disabled.
    pub stripped_appearances: usize,
    /// Surface data targets dropped because their surface is gone.
    pub dropped_targets: usize,
    /// Reference links removed because their target was detached.
    pub detached_references: usize,
    /// Reference links replaced by the detached object they pointed at.
    pub rehydrated_references: usize,
    /// Whether envelopes were recomputed.
    pub envelopes_computed: bool,
}

/// Per-worker cleanup pipeline.
///
/// # Examples
/// ```
/// use citydb_core::test_support::GraphBuilder;
/// use citydb_core::{Direction, Lod, LodFilter, LodMode, Postprocessor, PruneLog};
///
/// let mut builder = GraphBuilder::building("b1");
/// let root = builder.root();
/// builder.geometry(root, "g1", Some(1));
/// let part = builder.part(root, "p1");
/// builder.geometry(part, "g2", Some(2));
/// let mut graph = builder.finish();
///
/// let keep_lod1 = LodFilter::new(LodMode::Keep, [Lod::new(1).expect("in range")]);
/// let report = Postprocessor::new(keep_lod1, Direction::Export)
///     .process(&mut graph, &mut PruneLog::default())
///     .expect("graph is consistent");
///
/// assert!(report.removed_features.contains("p1"));
/// assert!(!graph.is_attached(part));
/// ```
#[derive(Debug, Clone)]
pub struct Postprocessor {
    lod: LodFilter,
    direction: Direction,
    appearances: bool,
}

impl Postprocessor {
    /// Postprocessor with appearance processing enabled.
    #[must_use]
    pub const fn new(lod: LodFilter, direction: Direction) -> Self {
        Self {
            lod,
            direction,
            appearances: true,
        }
    }

    /// Enable or disable appearance processing. When disabled, appearance
    /// properties are stripped from the graph.
    #[must_use]
    pub const fn with_appearances(mut self, appearances: bool) -> Self {
        self.appearances = appearances;
        self
    }

    /// The LOD policy in use.
    #[must_use]
    pub const fn lod_filter(&self) -> &LodFilter {
        &self.lod
    }

    /// Run the pipeline over `graph`.
    ///
    /// `log` may already hold removals recorded while the graph was streamed
    /// in; it is extended, not reset.
    ///
    /// # Errors
    /// Fails when the graph has no root or links resolve to the wrong kind.
    pub fn process(
        &self,
        graph: &mut FeatureGraph,
        log: &mut PruneLog,
    ) -> Result<PostprocessReport, GraphError> {
        let root = graph.root_id()?;
        let mut report = PostprocessReport::default();

        if !self.appearances {
            report.stripped_appearances = strip_appearances(graph);
        }

        self.lod.remove_geometries(graph, root, log)?;
        report.removed_geometries = log.removed();

        let pruned = log.has_removed_geometry();
        if pruned {
            debug!(
                "cascading cleanup after {} removed spatial propert(ies)",
                log.removed()
            );
            cascade::remove_empty_features(graph, root, log, &mut report)?;
            cascade::rehydrate_references(graph, &mut report)?;
        }

        let mut emptied = HashSet::new();
        if self.appearances {
            let linkage = link_appearances(graph, self.direction == Direction::Export);
            report.dropped_targets = linkage.dropped;
            emptied = linkage.emptied;
        }

        if pruned {
            cascade::remove_empty_surface_data(graph, &emptied, &mut report)?;
            cascade::detach_references(graph, &mut report)?;
            if !report.removed_surface_data.is_empty() {
                cascade::remove_empty_appearances(graph, &mut report)?;
            }
            compute_envelopes(graph)?;
            report.envelopes_computed = true;
        } else if self.direction == Direction::Import {
            compute_envelopes(graph)?;
            report.envelopes_computed = true;
        }

        sort_properties(graph)?;
        Ok(report)
    }
}

fn strip_appearances(graph: &mut FeatureGraph) -> usize {
    let mut stripped = 0;
    for id in graph.attached() {
        let Some(node) = graph.get_mut(id) else { continue };
        if let NodeKind::Feature(feature) = &mut node.kind {
            let before = feature.properties.len();
            feature
                .properties
                .retain(|property| !matches!(property.value, PropertyValue::Appearance { .. }));
            stripped += before - feature.properties.len();
        }
    }
    stripped
}

/// Stable sort by name so equal graphs serialize identically.
fn sort_properties(graph: &mut FeatureGraph) -> Result<(), GraphError> {
    for id in graph.attached() {
        if let NodeKind::Feature(feature) = &mut graph.node_mut(id)?.kind {
            feature
                .properties
                .sort_by(|left, right| left.name.cmp(&right.name));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lod::{Lod, LodMode};
    use crate::test_support::GraphBuilder;
    use rstest::rstest;

    fn keep(level: u8) -> LodFilter {
        LodFilter::new(LodMode::Keep, [Lod::new(level).expect("valid level")])
    }

    #[rstest]
    fn nothing_removed_skips_cascade_on_export() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        builder.geometry(root, "g1", Some(2));
        let mut graph = builder.finish();

        let report = Postprocessor::new(LodFilter::default(), Direction::Export)
            .process(&mut graph, &mut PruneLog::default())
            .expect("processes");

        assert!(!report.envelopes_computed);
        assert!(graph.feature(root).expect("feature").envelope.is_empty());
    }

    #[rstest]
    fn import_always_computes_envelopes() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        builder.geometry(root, "g1", Some(2));
        let mut graph = builder.finish();

        let report = Postprocessor::new(LodFilter::default(), Direction::Import)
            .process(&mut graph, &mut PruneLog::default())
            .expect("processes");

        assert!(report.envelopes_computed);
        assert!(!graph.feature(root).expect("feature").envelope.is_empty());
    }

    #[rstest]
    fn disabled_appearances_are_stripped() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        builder.surface_geometry(root, "g1", Some(2), &["s1"]);
        let appearance = builder.appearance(root);
        builder.material(appearance, "m1", &["s1"]);
        let mut graph = builder.finish();

        let report = Postprocessor::new(LodFilter::default(), Direction::Import)
            .with_appearances(false)
            .process(&mut graph, &mut PruneLog::default())
            .expect("processes");

        assert_eq!(report.stripped_appearances, 1);
        assert!(!graph.is_attached(appearance));
    }

    #[rstest]
    fn pruned_surfaces_empty_their_appearance() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        builder.surface_geometry(root, "g1", Some(1), &["s1"]);
        builder.surface_geometry(root, "g2", Some(2), &["s2"]);
        let appearance = builder.appearance(root);
        builder.material(appearance, "m1", &["s2"]);
        let mut graph = builder.finish();

        let report = Postprocessor::new(keep(1), Direction::Import)
            .process(&mut graph, &mut PruneLog::default())
            .expect("processes");

        assert!(report.removed_surface_data.contains("m1"));
        assert_eq!(report.removed_appearances, 1);
        assert!(!graph.is_attached(appearance));
    }

    #[rstest]
    fn properties_are_sorted_by_name() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        builder.attribute(root, "core:zeta", "z");
        builder.attribute(root, "core:alpha", "a");
        let mut graph = builder.finish();

        Postprocessor::new(LodFilter::default(), Direction::Export)
            .process(&mut graph, &mut PruneLog::default())
            .expect("processes");

        let names: Vec<_> = graph
            .feature(root)
            .expect("feature")
            .properties
            .iter()
            .map(|property| property.name.as_str())
            .collect();
        assert_eq!(names, vec!["core:alpha", "core:zeta"]);
    }
}
