//! Cleanup that follows LOD pruning: empty features, empty surface data,
//! dangling references and empty appearances.

use std::collections::{HashMap, HashSet};

use log::trace;

use super::PostprocessReport;
use crate::cache::CacheType;
use crate::error::GraphError;
use crate::lod::PruneLog;
use crate::model::{FeatureGraph, Link, NodeId, NodeKind, PropertyValue, RelationType};

/// Detach nested features left without geometry, innermost first.
///
/// Only features joined by [`RelationType::Contains`] are considered, and
/// only those that were pruned themselves or lost a nested feature; a
/// feature that never carried geometry is left alone.
pub(super) fn remove_empty_features(
    graph: &mut FeatureGraph,
    root: NodeId,
    log: &PruneLog,
    report: &mut PostprocessReport,
) -> Result<(), GraphError> {
    let mut detached = Vec::new();
    let mut seen = HashSet::new();
    prune_children(graph, root, log, &mut detached, &mut seen)?;
    if detached.is_empty() {
        return Ok(());
    }

    let live = live_object_ids(graph);
    for id in detached.into_iter().flat_map(|child| graph.descendants(child)) {
        let Some(node) = graph.get(id) else { continue };
        let Some(object_id) = &node.object_id else {
            continue;
        };
        if live.contains(&(node.kind.cache_type(), object_id.as_str())) {
            continue;
        }
        match node.kind {
            NodeKind::Feature(_) => {
                report.removed_features.insert(object_id.clone());
            }
            NodeKind::SurfaceData(_) => {
                report.removed_surface_data.insert(object_id.clone());
            }
            _ => {}
        }
    }
    Ok(())
}

/// Returns whether `feature` lost a nested feature.
fn prune_children(
    graph: &mut FeatureGraph,
    feature: NodeId,
    log: &PruneLog,
    detached: &mut Vec<NodeId>,
    seen: &mut HashSet<NodeId>,
) -> Result<bool, GraphError> {
    if !seen.insert(feature) {
        return Err(GraphError::Cycle { id: feature });
    }
    let children: Vec<NodeId> = graph
        .feature(feature)?
        .properties
        .iter()
        .filter_map(|property| match &property.value {
            PropertyValue::Feature {
                relation: RelationType::Contains,
                link: Link::Inline(child),
            } => Some(*child),
            _ => None,
        })
        .collect();

    let mut lost_child = false;
    for child in children {
        let emptied = prune_children(graph, child, log, detached, seen)?;
        let content = graph.feature(child)?;
        let empty = !content.has_spatial_properties() && !content.has_contained_features();
        if empty && (emptied || log.pruned_features().contains(&child)) {
            trace!("detaching empty feature {child} from {feature}");
            graph
                .feature_mut(feature)?
                .properties
                .retain(|property| property.link() != Some(&Link::Inline(child)));
            graph.node_mut(child)?.parent = None;
            detached.push(child);
            lost_child = true;
        }
    }
    Ok(lost_child)
}

/// Detach surface data that no longer target any surface from their
/// appearances.
pub(super) fn remove_empty_surface_data(
    graph: &mut FeatureGraph,
    emptied: &HashSet<NodeId>,
    report: &mut PostprocessReport,
) -> Result<(), GraphError> {
    if emptied.is_empty() {
        return Ok(());
    }
    for id in graph.attached() {
        if !matches!(graph.node(id)?.kind, NodeKind::Appearance(_)) {
            continue;
        }
        let mut removed = Vec::new();
        graph.appearance_mut(id)?.surface_data.retain(|link| {
            match link.inline().filter(|data| emptied.contains(data)) {
                Some(data) => {
                    removed.push(data);
                    false
                }
                None => true,
            }
        });
        for data in removed {
            let node = graph.node_mut(data)?;
            node.parent = None;
            if let Some(object_id) = &node.object_id {
                report.removed_surface_data.insert(object_id.clone());
            }
        }
    }
    Ok(())
}

/// Drop feature and surface data references whose target was removed.
pub(super) fn detach_references(
    graph: &mut FeatureGraph,
    report: &mut PostprocessReport,
) -> Result<(), GraphError> {
    for id in graph.attached() {
        match &mut graph.node_mut(id)?.kind {
            NodeKind::Feature(feature) => {
                let before = feature.properties.len();
                feature.properties.retain(|property| match &property.value {
                    PropertyValue::Feature {
                        link: Link::Reference(href),
                        ..
                    } => !report.removed_features.contains(href),
                    _ => true,
                });
                report.detached_references += before - feature.properties.len();
            }
            NodeKind::Appearance(appearance) => {
                let before = appearance.surface_data.len();
                appearance.surface_data.retain(|link| {
                    link.reference()
                        .is_none_or(|href| !report.removed_surface_data.contains(href))
                });
                report.detached_references += before - appearance.surface_data.len();
            }
            _ => {}
        }
    }
    Ok(())
}

/// Replace geometry and implicit geometry references whose target is no
/// longer attached by the detached object itself, once per object.
///
/// Runs before appearance linkage so surfaces of a rehydrated geometry keep
/// their surface data.
pub(super) fn rehydrate_references(
    graph: &mut FeatureGraph,
    report: &mut PostprocessReport,
) -> Result<(), GraphError> {
    let attached = graph.attached();
    let mut rehydrate = Rehydration::new(graph);
    for &id in &attached {
        if !matches!(graph.node(id)?.kind, NodeKind::Feature(_)) {
            continue;
        }
        let len = graph.feature(id)?.properties.len();
        for index in 0..len {
            rehydrate.property(graph, id, index, report)?;
        }
    }
    Ok(())
}

struct Rehydration {
    live: HashSet<(CacheType, String)>,
    geometries: HashMap<String, NodeId>,
    implicit: HashMap<String, NodeId>,
}

impl Rehydration {
    fn new(graph: &FeatureGraph) -> Self {
        let mut live = HashSet::new();
        for id in graph.attached() {
            if let Some(node) = graph.get(id)
                && let Some(cache_type) = node.kind.cache_type()
                && let Some(object_id) = &node.object_id
            {
                live.insert((cache_type, object_id.clone()));
            }
        }
        Self {
            live,
            geometries: graph.object_index(CacheType::Geometry),
            implicit: graph.object_index(CacheType::ImplicitGeometry),
        }
    }

    fn property(
        &mut self,
        graph: &mut FeatureGraph,
        feature: NodeId,
        index: usize,
        report: &mut PostprocessReport,
    ) -> Result<(), GraphError> {
        let (cache_type, href) = match graph
            .feature(feature)?
            .properties
            .get(index)
            .map(|property| &property.value)
        {
            Some(PropertyValue::Geometry {
                link: Link::Reference(href),
                ..
            }) => (CacheType::Geometry, href.clone()),
            Some(PropertyValue::ImplicitGeometry {
                link: Link::Reference(href),
                ..
            }) => (CacheType::ImplicitGeometry, href.clone()),
            _ => return Ok(()),
        };
        if self.live.contains(&(cache_type, href.clone())) {
            return Ok(());
        }
        let index_map = match cache_type {
            CacheType::ImplicitGeometry => &self.implicit,
            _ => &self.geometries,
        };
        let Some(&target) = index_map.get(&href) else {
            return Ok(());
        };

        trace!("rehydrating reference to {href} on {feature}");
        if let Some(link) = graph
            .feature_mut(feature)?
            .properties
            .get_mut(index)
            .and_then(|property| property.link_mut())
        {
            *link = Link::Inline(target);
        }
        graph.adopt(feature, target)?;
        for id in graph.descendants(target) {
            if let Some(node) = graph.get(id)
                && let Some(cache_type) = node.kind.cache_type()
                && let Some(object_id) = &node.object_id
            {
                self.live.insert((cache_type, object_id.clone()));
            }
        }
        report.rehydrated_references += 1;
        Ok(())
    }
}

/// Detach appearances that hold no surface data.
pub(super) fn remove_empty_appearances(
    graph: &mut FeatureGraph,
    report: &mut PostprocessReport,
) -> Result<(), GraphError> {
    for id in graph.attached() {
        if !matches!(graph.node(id)?.kind, NodeKind::Feature(_)) {
            continue;
        }
        let empty: Vec<NodeId> = graph
            .feature(id)?
            .properties
            .iter()
            .filter_map(|property| match &property.value {
                PropertyValue::Appearance {
                    link: Link::Inline(appearance),
                } => Some(*appearance),
                _ => None,
            })
            .filter(|appearance| {
                graph
                    .appearance(*appearance)
                    .is_ok_and(|content| content.surface_data.is_empty())
            })
            .collect();
        if empty.is_empty() {
            continue;
        }
        graph.feature_mut(id)?.properties.retain(|property| {
            property
                .link()
                .and_then(Link::inline)
                .is_none_or(|target| !empty.contains(&target))
        });
        for appearance in &empty {
            graph.node_mut(*appearance)?.parent = None;
        }
        report.removed_appearances += empty.len();
    }
    Ok(())
}

fn live_object_ids(graph: &FeatureGraph) -> HashSet<(Option<CacheType>, &str)> {
    graph
        .attached()
        .into_iter()
        .filter_map(|id| graph.get(id))
        .filter_map(|node| {
            node.object_id
                .as_deref()
                .map(|object_id| (node.kind.cache_type(), object_id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lod::{Lod, LodFilter, LodMode};
    use crate::model::ImplicitPlacement;
    use crate::test_support::GraphBuilder;
    use rstest::rstest;

    fn prune(graph: &mut FeatureGraph, level: u8) -> PruneLog {
        let mut log = PruneLog::default();
        let root = graph.root_id().expect("root");
        LodFilter::new(LodMode::Keep, [Lod::new(level).expect("valid level")])
            .remove_geometries(graph, root, &mut log)
            .expect("prunes");
        log
    }

    #[rstest]
    fn emptied_parts_are_detached_innermost_first() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        builder.geometry(root, "g0", Some(2));
        let part = builder.part(root, "p1");
        let inner = builder.part(part, "p2");
        builder.geometry(inner, "g1", Some(1));
        let mut graph = builder.finish();
        let log = prune(&mut graph, 2);

        let mut report = PostprocessReport::default();
        remove_empty_features(&mut graph, root, &log, &mut report).expect("cascades");

        assert!(!graph.is_attached(part));
        assert!(!graph.is_attached(inner));
        assert!(report.removed_features.contains("p1"));
        assert!(report.removed_features.contains("p2"));
    }

    #[rstest]
    fn features_without_geometry_from_the_start_survive() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        builder.geometry(root, "g0", Some(1));
        let bare = builder.part(root, "p1");
        builder.attribute(bare, "core:name", "annex");
        let mut graph = builder.finish();
        let log = prune(&mut graph, 2);

        let mut report = PostprocessReport::default();
        remove_empty_features(&mut graph, root, &log, &mut report).expect("cascades");

        assert!(graph.is_attached(bare));
        assert!(report.removed_features.is_empty());
    }

    #[rstest]
    fn related_features_are_not_cascaded() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        let related = builder.related(root, "r1");
        builder.geometry(related, "g1", Some(1));
        let mut graph = builder.finish();
        let log = prune(&mut graph, 2);

        let mut report = PostprocessReport::default();
        remove_empty_features(&mut graph, root, &log, &mut report).expect("cascades");

        assert!(graph.is_attached(related));
    }

    #[rstest]
    fn references_to_removed_features_are_detached() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        builder.feature_reference(root, "p1");
        builder.feature_reference(root, "elsewhere");
        let mut graph = builder.finish();
        let mut report = PostprocessReport::default();
        report.removed_features.insert("p1".to_owned());

        detach_references(&mut graph, &mut report).expect("repairs");

        assert_eq!(report.detached_references, 1);
        assert_eq!(graph.feature(root).expect("feature").properties.len(), 1);
    }

    #[rstest]
    fn references_to_removed_surface_data_are_dropped() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        let appearance = builder.appearance(root);
        builder.surface_data_reference(appearance, "m1");
        let mut graph = builder.finish();
        let mut report = PostprocessReport::default();
        report.removed_surface_data.insert("m1".to_owned());

        detach_references(&mut graph, &mut report).expect("repairs");

        assert!(
            graph
                .appearance(appearance)
                .expect("appearance")
                .surface_data
                .is_empty()
        );
    }

    #[rstest]
    fn implicit_reference_to_pruned_object_is_rehydrated() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        let implicit = builder.implicit(root, "tree", Some(1));
        let part = builder.part(root, "p1");
        builder.implicit_reference(part, "tree", Some(2), ImplicitPlacement::default());
        let mut graph = builder.finish();
        prune(&mut graph, 2);
        assert!(!graph.is_attached(implicit));

        let mut report = PostprocessReport::default();
        rehydrate_references(&mut graph, &mut report).expect("repairs");

        assert_eq!(report.rehydrated_references, 1);
        assert!(graph.is_attached(implicit));
        assert_eq!(graph.get(implicit).and_then(|node| node.parent), Some(part));
    }

    #[rstest]
    fn only_the_first_reference_is_rehydrated() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        let geometry = builder.geometry(root, "g1", Some(1));
        builder.geometry_reference(root, "g1", Some(2));
        builder.geometry_reference(root, "g1", Some(2));
        let mut graph = builder.finish();
        prune(&mut graph, 2);

        let mut report = PostprocessReport::default();
        rehydrate_references(&mut graph, &mut report).expect("repairs");

        assert_eq!(report.rehydrated_references, 1);
        assert!(graph.is_attached(geometry));
        let references = graph
            .feature(root)
            .expect("feature")
            .properties
            .iter()
            .filter(|property| property.link().and_then(Link::reference).is_some())
            .count();
        assert_eq!(references, 1);
    }

    #[rstest]
    fn empty_appearances_are_detached() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        let empty = builder.appearance(root);
        let kept = builder.appearance(root);
        builder.material(kept, "m1", &["s1"]);
        let mut graph = builder.finish();

        let mut report = PostprocessReport::default();
        remove_empty_appearances(&mut graph, &mut report).expect("cascades");

        assert_eq!(report.removed_appearances, 1);
        assert!(!graph.is_attached(empty));
        assert!(graph.is_attached(kept));
    }
}
