//! Surface data to geometry linkage.

use std::collections::{HashMap, HashSet};

use crate::model::{FeatureGraph, NodeId, NodeKind, SurfaceMapping, SurfaceTarget};

/// Outcome of [`link_appearances`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppearanceLinkage {
    /// Targets bound to a live geometry.
    pub resolved: usize,
    /// Targets dropped because their surface no longer exists.
    pub dropped: usize,
    /// Surface data that lost all of their targets.
    pub emptied: HashSet<NodeId>,
}

type SurfaceKey = (Option<i64>, String);

/// Resolve every surface data target against the surfaces of live
/// geometries, dropping those whose surface is gone.
///
/// Targets are keyed by `(root geometry database id, surface object id)`.
/// With `use_database_ids` unset, as on import where database ids are not
/// yet assigned, only the surface object id is used.
pub fn link_appearances(graph: &mut FeatureGraph, use_database_ids: bool) -> AppearanceLinkage {
    let attached = graph.attached();
    let lookup = surface_lookup(graph, &attached);
    let mut linkage = AppearanceLinkage::default();

    for id in attached {
        let Some(node) = graph.get_mut(id) else { continue };
        let NodeKind::SurfaceData(data) = &mut node.kind else {
            continue;
        };
        if data.targets.is_empty() {
            continue;
        }
        let before = data.targets.len();
        data.targets.retain_mut(|target| {
            let root_geometry = if use_database_ids {
                target.root_geometry
            } else {
                None
            };
            let Some(live) = lookup.get(&(root_geometry, target.surface.clone())) else {
                return false;
            };
            if !retain_mapping(target, &live.rings) {
                return false;
            }
            target.resolved = Some(live.geometry);
            true
        });
        linkage.resolved += data.targets.len();
        linkage.dropped += before - data.targets.len();
        if data.targets.is_empty() {
            linkage.emptied.insert(id);
        }
    }
    linkage
}

struct LiveSurface {
    geometry: NodeId,
    rings: Vec<String>,
}

fn surface_lookup(graph: &FeatureGraph, attached: &[NodeId]) -> HashMap<SurfaceKey, LiveSurface> {
    let mut lookup = HashMap::new();
    for &id in attached {
        let Some(node) = graph.get(id) else { continue };
        let NodeKind::Geometry(geometry) = &node.kind else {
            continue;
        };
        for surface in &geometry.surfaces {
            let Some(surface_id) = &surface.object_id else {
                continue;
            };
            let rings: Vec<String> = surface
                .rings
                .iter()
                .filter_map(|ring| ring.object_id.clone())
                .collect();
            if let Some(database_id) = node.database_id {
                lookup
                    .entry((Some(database_id), surface_id.clone()))
                    .or_insert_with(|| LiveSurface {
                        geometry: id,
                        rings: rings.clone(),
                    });
            }
            lookup
                .entry((None, surface_id.clone()))
                .or_insert(LiveSurface { geometry: id, rings });
        }
    }
    lookup
}

/// Keep only texture coordinates of rings that still exist. A target whose
/// coordinates all vanish is dropped.
fn retain_mapping(target: &mut SurfaceTarget, rings: &[String]) -> bool {
    match &mut target.mapping {
        SurfaceMapping::TextureCoordinates(coordinates) if !rings.is_empty() => {
            coordinates.retain(|entry| rings.contains(&entry.ring));
            !coordinates.is_empty()
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RingCoordinates;
    use crate::test_support::GraphBuilder;
    use rstest::rstest;

    #[rstest]
    fn unresolvable_targets_are_dropped() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        let geometry = builder.surface_geometry(root, "g1", Some(2), &["s1"]);
        let appearance = builder.appearance(root);
        let material = builder.material(appearance, "m1", &["s1", "gone"]);
        let mut graph = builder.finish();

        let linkage = link_appearances(&mut graph, false);

        assert_eq!(linkage.resolved, 1);
        assert_eq!(linkage.dropped, 1);
        let targets = &graph.surface_data(material).expect("surface data").targets;
        assert_eq!(targets.len(), 1);
        assert_eq!(targets.first().and_then(|t| t.resolved), Some(geometry));
    }

    #[rstest]
    fn database_ids_disambiguate_repeated_surface_ids() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        let first = builder.surface_geometry(root, "g1", Some(2), &["s1"]);
        let second = builder.surface_geometry(root, "g2", Some(2), &["s1"]);
        let appearance = builder.appearance(root);
        let material = builder.material(appearance, "m1", &["s1"]);
        let mut graph = builder.finish();
        graph.node_mut(first).expect("node").database_id = Some(10);
        graph.node_mut(second).expect("node").database_id = Some(20);
        if let Some(target) = graph
            .surface_data_mut(material)
            .expect("surface data")
            .targets
            .first_mut()
        {
            target.root_geometry = Some(20);
        }

        link_appearances(&mut graph, true);

        let targets = &graph.surface_data(material).expect("surface data").targets;
        assert_eq!(targets.first().and_then(|t| t.resolved), Some(second));
    }

    #[rstest]
    fn vanished_rings_drop_texture_coordinates() {
        let mut builder = GraphBuilder::building("b1");
        let root = builder.root();
        let geometry = builder.surface_geometry(root, "g1", Some(2), &["s1"]);
        let appearance = builder.appearance(root);
        let texture = builder.texture(appearance, "t1", "roof.png", &["s1"]);
        let mut graph = builder.finish();
        if let Some(ring) = graph
            .geometry_mut(geometry)
            .expect("geometry")
            .surfaces
            .first_mut()
            .and_then(|surface| surface.rings.first_mut())
        {
            ring.object_id = Some("r1".to_owned());
        }
        if let Some(target) = graph
            .surface_data_mut(texture)
            .expect("surface data")
            .targets
            .first_mut()
        {
            target.mapping = SurfaceMapping::TextureCoordinates(vec![RingCoordinates {
                ring: "r-other".to_owned(),
                coordinates: vec![[0.0, 0.0]],
            }]);
        }

        let linkage = link_appearances(&mut graph, false);

        assert!(linkage.emptied.contains(&texture));
    }
}
