//! Bottom-up envelope recomputation.

use std::collections::{HashMap, HashSet};

use crate::cache::CacheType;
use crate::envelope::Envelope;
use crate::error::GraphError;
use crate::model::{FeatureGraph, ImplicitPlacement, Link, NodeId, PropertyValue, RelationType};

/// Recompute the envelope of every feature owned by the root, children
/// before parents, and return the root envelope.
///
/// A feature covers its own geometries, its placed implicit geometries and
/// the features it contains. Related features do not contribute. An
/// implicit geometry whose template cannot be found contributes only its
/// reference point.
///
/// # Errors
/// Fails when the graph has no root, a contained feature link does not
/// resolve to a feature, or contained features form a cycle.
///
/// # Examples
/// ```
/// use citydb_core::compute_envelopes;
/// use citydb_core::test_support::GraphBuilder;
/// use glam::DVec3;
///
/// let mut builder = GraphBuilder::building("b1");
/// let root = builder.root();
/// builder.geometry_at(root, "g1", Some(2), DVec3::new(5.0, 5.0, 0.0));
/// let mut graph = builder.finish();
///
/// let envelope = compute_envelopes(&mut graph).expect("graph has a root");
/// assert_eq!(envelope.upper(), Some(DVec3::new(6.0, 6.0, 0.0)));
/// ```
pub fn compute_envelopes(graph: &mut FeatureGraph) -> Result<Envelope, GraphError> {
    let root = graph.root_id()?;
    let implicit_index = if graph.has_implicit_geometries() {
        graph.object_index(CacheType::ImplicitGeometry)
    } else {
        HashMap::new()
    };
    let mut seen = HashSet::new();
    feature_envelope(graph, root, &implicit_index, &mut seen)
}

fn feature_envelope(
    graph: &mut FeatureGraph,
    feature: NodeId,
    implicit_index: &HashMap<String, NodeId>,
    seen: &mut HashSet<NodeId>,
) -> Result<Envelope, GraphError> {
    if !seen.insert(feature) {
        return Err(GraphError::Cycle { id: feature });
    }
    let mut envelope = Envelope::empty();
    let mut children = Vec::new();
    for property in &graph.feature(feature)?.properties {
        match &property.value {
            PropertyValue::Geometry {
                link: Link::Inline(geometry),
                ..
            } => {
                envelope.include(&graph.geometry(*geometry)?.envelope());
            }
            PropertyValue::ImplicitGeometry {
                link, placement, ..
            } => {
                envelope.include(&implicit_envelope(graph, link, placement, implicit_index));
            }
            PropertyValue::Feature {
                relation: RelationType::Contains,
                link: Link::Inline(child),
            } => children.push(*child),
            _ => {}
        }
    }
    for child in children {
        let nested = feature_envelope(graph, child, implicit_index, seen)?;
        envelope.include(&nested);
    }
    graph.feature_mut(feature)?.envelope = envelope;
    Ok(envelope)
}

fn implicit_envelope(
    graph: &FeatureGraph,
    link: &Link,
    placement: &ImplicitPlacement,
    implicit_index: &HashMap<String, NodeId>,
) -> Envelope {
    let node = match link {
        Link::Inline(id) => Some(*id),
        Link::Reference(href) => implicit_index.get(href).copied(),
    };
    let template = node
        .and_then(|id| graph.implicit_geometry(id).ok())
        .and_then(|implicit| implicit.relative_geometry)
        .and_then(|id| graph.geometry(id).ok());
    match template {
        Some(geometry) => placement.place_envelope(&geometry.envelope()),
        None => placement
            .reference_point
            .map_or_else(Envelope::empty, Envelope::from_point),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::GraphBuilder;
    use glam::DVec3;
    use rstest::rstest;

    #[rstest]
    fn parent_covers_contained_children() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        let first = builder.part(root, "p1");
        let g1 = builder.geometry_at(first, "g1", None, DVec3::ZERO);
        let second = builder.part(root, "p2");
        let g2 = builder.geometry_at(second, "g2", None, DVec3::splat(2.0));
        let mut graph = builder.finish();
        for (geometry, corner) in [(g1, DVec3::ONE), (g2, DVec3::splat(3.0))] {
            graph.geometry_mut(geometry).expect("geometry").points.push(corner);
        }

        let envelope = compute_envelopes(&mut graph).expect("computes");

        assert_eq!(envelope.lower(), Some(DVec3::ZERO));
        assert_eq!(envelope.upper(), Some(DVec3::splat(3.0)));
        let child = graph.feature(first).expect("feature").envelope;
        assert_eq!(child.upper(), Some(DVec3::ONE));
    }

    #[rstest]
    fn related_features_do_not_contribute() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        builder.geometry(root, "g1", None);
        let related = builder.related(root, "r1");
        builder.geometry_at(related, "g2", None, DVec3::splat(10.0));
        let mut graph = builder.finish();

        let envelope = compute_envelopes(&mut graph).expect("computes");

        assert_eq!(envelope.upper(), Some(DVec3::new(1.0, 1.0, 0.0)));
    }

    #[rstest]
    fn implicit_geometry_is_placed() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        builder.implicit_placed(
            root,
            "tree",
            Some(2),
            ImplicitPlacement {
                transformation: Some([
                    2.0, 0.0, 0.0, 0.0, //
                    0.0, 2.0, 0.0, 0.0, //
                    0.0, 0.0, 1.0, 0.0, //
                    0.0, 0.0, 0.0, 1.0,
                ]),
                reference_point: Some(DVec3::new(10.0, 20.0, 0.0)),
            },
        );
        let mut graph = builder.finish();

        let envelope = compute_envelopes(&mut graph).expect("computes");

        assert_eq!(envelope.lower(), Some(DVec3::new(10.0, 20.0, 0.0)));
        assert_eq!(envelope.upper(), Some(DVec3::new(12.0, 22.0, 0.0)));
    }

    #[rstest]
    fn unresolvable_template_falls_back_to_reference_point() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        builder.implicit_reference(
            root,
            "elsewhere",
            Some(2),
            ImplicitPlacement {
                transformation: None,
                reference_point: Some(DVec3::new(4.0, 5.0, 6.0)),
            },
        );
        let mut graph = builder.finish();

        let envelope = compute_envelopes(&mut graph).expect("computes");

        assert_eq!(envelope.lower(), Some(DVec3::new(4.0, 5.0, 6.0)));
        assert_eq!(envelope.upper(), Some(DVec3::new(4.0, 5.0, 6.0)));
    }

    #[rstest]
    fn detached_templates_are_not_consulted() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        let implicit = builder.implicit(root, "tree", Some(1));
        builder.implicit_reference(
            root,
            "tree",
            Some(2),
            ImplicitPlacement {
                transformation: None,
                reference_point: Some(DVec3::new(7.0, 7.0, 7.0)),
            },
        );
        let mut graph = builder.finish();
        graph
            .feature_mut(root)
            .expect("feature")
            .properties
            .retain(|property| property.link() != Some(&Link::Inline(implicit)));
        graph.node_mut(implicit).expect("node").parent = None;
        assert!(!graph.has_implicit_geometries());

        let envelope = compute_envelopes(&mut graph).expect("computes");

        assert_eq!(envelope.lower(), Some(DVec3::splat(7.0)));
        assert_eq!(envelope.upper(), Some(DVec3::splat(7.0)));
    }
}
