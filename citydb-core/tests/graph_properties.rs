//! Property-based tests for allocation and pruning.
//!
//! # Invariants tested
//!
//! - **Deduplication:** objects sharing an object id get one row.
//! - **Conservation:** every allocated value is consumed by exactly one row.
//! - **Sharing:** implicit templates, surface data and texture images linked
//!   more than once still get one row each, and references to them resolve.
//! - **Idempotence:** `Minimum` and `Maximum` pruning is stable on a second
//!   run.
//! - **Cascade completeness:** no reference survives to an object removed by
//!   the same cleanup.

use std::collections::BTreeSet;

use citydb_core::test_support::{GraphBuilder, MemoryImplicitGeometries, MemorySequences};
use citydb_core::{
    CacheType, Direction, FeatureGraph, ImplicitPlacement, Lod, LodFilter, LodMode, NodeKind,
    PostprocessReport, Postprocessor, PropertyValue, PruneLog, Sequence, SequenceAllocator,
    WritePlan,
};
use proptest::prelude::*;

/// `(owner index, LOD)` per geometry; owner 0 is the root, 1 and 2 are parts.
fn geometries() -> impl Strategy<Value = Vec<(usize, Option<u8>)>> {
    prop::collection::vec((0_usize..3, prop::option::of(0_u8..=4)), 1..12)
}

fn building(geometries: &[(usize, Option<u8>)], addresses: &[u8]) -> FeatureGraph {
    let mut builder = GraphBuilder::building("b1");
    let root = builder.root();
    let first = builder.part(root, "p1");
    let second = builder.part(first, "p2");
    let owners = [root, first, second];
    for (index, (owner, lod)) in geometries.iter().enumerate() {
        let owner = owners.get(*owner).copied().unwrap_or(root);
        builder.geometry(owner, &format!("g{index}"), *lod);
    }
    for address in addresses {
        builder.address(root, &format!("a{address}"));
    }
    builder.feature_reference(root, "p1");
    builder.feature_reference(root, "p2");
    builder.finish()
}

fn lod_levels(graph: &FeatureGraph) -> Vec<Option<u8>> {
    graph
        .attached()
        .into_iter()
        .filter_map(|id| graph.feature(id).ok())
        .flat_map(|feature| feature.properties.iter())
        .filter(|property| property.is_spatial())
        .map(|property| property.lod().map(Lod::level))
        .collect()
}

fn streaming_mode() -> impl Strategy<Value = LodMode> {
    prop_oneof![Just(LodMode::Keep), Just(LodMode::Remove)]
}

fn levels() -> impl Strategy<Value = Vec<Lod>> {
    prop::collection::vec(0_u8..=4, 0..3).prop_map(|levels| {
        levels
            .into_iter()
            .filter_map(|level| Lod::new(level).ok())
            .collect()
    })
}

/// Surface data entry of a generated appearance.
#[derive(Debug, Clone)]
enum Styling {
    /// Inline material `m<k>`.
    Material(u8),
    /// Inline texture `t<k>` holding image `img<j>.png`.
    Texture(u8, u8),
    /// Reference to material `m<k>`.
    Reference(u8),
}

const SURFACES: [&str; 3] = ["s0", "s1", "s2"];

fn styling() -> impl Strategy<Value = Styling> {
    prop_oneof![
        (0_u8..3).prop_map(Styling::Material),
        (0_u8..3, 0_u8..2).prop_map(|(texture, image)| Styling::Texture(texture, image)),
        (0_u8..3).prop_map(Styling::Reference),
    ]
}

/// `(template index, inline)` per implicit geometry property.
fn implicits() -> impl Strategy<Value = Vec<(u8, bool)>> {
    prop::collection::vec((0_u8..3, any::<bool>()), 0..6)
}

fn appearances() -> impl Strategy<Value = Vec<Vec<Styling>>> {
    prop::collection::vec(prop::collection::vec(styling(), 0..5), 0..3)
}

fn surface(index: u8) -> &'static str {
    SURFACES[usize::from(index) % SURFACES.len()]
}

fn styled_building(implicits: &[(u8, bool)], appearances: &[Vec<Styling>]) -> FeatureGraph {
    let mut builder = GraphBuilder::building("b1");
    let root = builder.root();
    builder.surface_geometry(root, "walls", Some(2), &SURFACES);
    for (template, inline) in implicits {
        let object_id = format!("tree{template}");
        if *inline {
            builder.implicit(root, &object_id, Some(2));
        } else {
            builder.implicit_reference(root, &object_id, Some(2), ImplicitPlacement::default());
        }
    }
    for styling in appearances {
        let appearance = builder.appearance(root);
        for entry in styling {
            match entry {
                Styling::Material(k) => {
                    builder.material(appearance, &format!("m{k}"), &[surface(*k)]);
                }
                Styling::Texture(k, image) => {
                    builder.texture(
                        appearance,
                        &format!("t{k}"),
                        &format!("img{image}.png"),
                        &[surface(*k)],
                    );
                }
                Styling::Reference(k) => {
                    builder.surface_data_reference(appearance, &format!("m{k}"));
                }
            }
        }
    }
    builder.finish()
}

/// Row counts and unresolved object ids a styled building must produce.
#[derive(Debug, Default)]
struct SharedRows {
    templates: BTreeSet<u8>,
    surface_data: usize,
    images: BTreeSet<u8>,
    links: usize,
    unresolved: BTreeSet<String>,
}

impl SharedRows {
    fn expected(implicits: &[(u8, bool)], appearances: &[Vec<Styling>]) -> Self {
        let templates = implicits
            .iter()
            .filter(|(_, inline)| *inline)
            .map(|(template, _)| *template)
            .collect();
        let mut rows = Self {
            templates,
            ..Self::default()
        };
        let mut materials = BTreeSet::new();
        let mut textures = BTreeSet::new();
        for entry in appearances.iter().flatten() {
            rows.links += 1;
            match entry {
                Styling::Material(k) => {
                    materials.insert(*k);
                }
                // A repeated texture is not walked again, so its image is
                // the one of the first occurrence.
                Styling::Texture(k, image) => {
                    if textures.insert(*k) {
                        rows.images.insert(*image);
                    }
                }
                Styling::Reference(_) => {}
            }
        }
        rows.surface_data = materials.len() + textures.len();
        for entry in appearances.iter().flatten() {
            if let Styling::Reference(k) = entry
                && !materials.contains(k)
            {
                rows.unresolved.insert(format!("m{k}"));
            }
        }
        for (template, inline) in implicits {
            if !inline && !rows.templates.contains(template) {
                rows.unresolved.insert(format!("tree{template}"));
            }
        }
        rows
    }
}

fn distinct_ids(ids: impl Iterator<Item = i64>) -> usize {
    ids.collect::<BTreeSet<_>>().len()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: shared addresses are counted and written once per object id.
    #[test]
    fn shared_objects_are_written_once(
        geometries in geometries(),
        addresses in prop::collection::vec(0_u8..4, 0..10),
    ) {
        let mut graph = building(&geometries, &addresses);
        let distinct: BTreeSet<u8> = addresses.iter().copied().collect();
        let sequences = MemorySequences::default();
        let lookup = MemoryImplicitGeometries::default();
        let allocator = SequenceAllocator::new(&sequences, &lookup);

        let count = allocator.count(&graph).expect("counts");
        prop_assert_eq!(count.get(Sequence::Address), distinct.len());
        prop_assert_eq!(count.first_occurrences(CacheType::Address), distinct.len());

        let mut values = allocator.allocate(count).expect("allocates");
        let plan = WritePlan::build(&mut graph, &mut values).expect("plans");
        prop_assert_eq!(plan.addresses.len(), distinct.len());
        prop_assert!(plan.deferred().next().is_none());
    }

    /// Property: each sequence hands out exactly as many values as rows use.
    #[test]
    fn allocation_matches_consumption(
        geometries in geometries(),
        addresses in prop::collection::vec(0_u8..4, 0..6),
    ) {
        let mut graph = building(&geometries, &addresses);
        let sequences = MemorySequences::default();
        let lookup = MemoryImplicitGeometries::default();
        let allocator = SequenceAllocator::new(&sequences, &lookup);
        let count = allocator.count(&graph).expect("counts");
        let expected = [
            count.get(Sequence::Feature),
            count.get(Sequence::Property),
            count.get(Sequence::GeometryData),
            count.get(Sequence::Address),
        ];
        let requests = Sequence::ALL
            .into_iter()
            .filter(|sequence| count.get(*sequence) > 0)
            .count();

        let mut values = allocator.allocate(count).expect("allocates");
        let plan = WritePlan::build(&mut graph, &mut values).expect("plans");

        prop_assert_eq!(
            expected,
            [
                plan.features.len(),
                plan.properties.len(),
                plan.geometries.len(),
                plan.addresses.len(),
            ]
        );
        prop_assert_eq!(sequences.requests(), requests);
        let ids: BTreeSet<i64> = plan.geometries.iter().map(|row| row.id).collect();
        prop_assert_eq!(ids.len(), plan.geometries.len());
    }

    /// Property: shared templates, surface data and texture images get one
    /// row per object id, every allocated value is consumed, and only
    /// references to objects never written inline stay deferred.
    #[test]
    fn shared_appearance_objects_are_written_once(
        implicits in implicits(),
        appearances in appearances(),
    ) {
        let mut graph = styled_building(&implicits, &appearances);
        let expected = SharedRows::expected(&implicits, &appearances);
        let sequences = MemorySequences::default();
        let lookup = MemoryImplicitGeometries::default();
        let allocator = SequenceAllocator::new(&sequences, &lookup);

        let count = allocator.count(&graph).expect("counts");
        prop_assert_eq!(count.get(Sequence::ImplicitGeometry), expected.templates.len());
        prop_assert_eq!(count.get(Sequence::GeometryData), 1 + expected.templates.len());
        prop_assert_eq!(count.get(Sequence::SurfaceData), expected.surface_data);
        prop_assert_eq!(count.get(Sequence::TexImage), expected.images.len());
        prop_assert_eq!(count.get(Sequence::Appearance), appearances.len());
        prop_assert_eq!(count.get(Sequence::AppearToSurfaceData), expected.links);

        let mut values = allocator.allocate(count).expect("allocates");
        let plan = WritePlan::build(&mut graph, &mut values).expect("plans");

        prop_assert_eq!(plan.implicit_geometries.len(), expected.templates.len());
        prop_assert_eq!(plan.geometries.len(), 1 + expected.templates.len());
        prop_assert_eq!(plan.surface_data.len(), expected.surface_data);
        prop_assert_eq!(plan.tex_images.len(), expected.images.len());
        prop_assert_eq!(plan.appearances.len(), appearances.len());
        prop_assert_eq!(plan.appear_to_surface_data.len(), expected.links);
        prop_assert_eq!(
            distinct_ids(plan.surface_data.iter().map(|row| row.id)),
            plan.surface_data.len()
        );
        prop_assert_eq!(
            distinct_ids(plan.tex_images.iter().map(|row| row.id)),
            plan.tex_images.len()
        );
        prop_assert_eq!(
            distinct_ids(plan.appear_to_surface_data.iter().map(|row| row.id)),
            plan.appear_to_surface_data.len()
        );
        let deferred: BTreeSet<String> = plan
            .deferred()
            .filter_map(|target| target.object_id().map(str::to_owned))
            .collect();
        prop_assert_eq!(deferred, expected.unresolved);
    }

    /// Property: a second `Minimum`/`Maximum` pass removes nothing.
    #[test]
    fn extreme_level_pruning_is_idempotent(
        geometries in geometries(),
        maximum in any::<bool>(),
        depth in prop::option::of(0_u32..3),
    ) {
        let mut graph = building(&geometries, &[]);
        let root = graph.root_id().expect("root");
        let mode = if maximum { LodMode::Maximum } else { LodMode::Minimum };
        let filter = LodFilter::new(mode, []).with_search_depth(depth);

        filter
            .remove_geometries(&mut graph, root, &mut PruneLog::default())
            .expect("first pass");
        let after_first = lod_levels(&graph);
        let mut log = PruneLog::default();
        let removed = filter
            .remove_geometries(&mut graph, root, &mut log)
            .expect("second pass");

        prop_assert_eq!(removed, 0);
        prop_assert!(!log.has_removed_geometry());
        prop_assert_eq!(lod_levels(&graph), after_first);
    }

    /// Property: streaming filters never keep a tagged property they reject.
    #[test]
    fn kept_levels_pass_the_filter(
        geometries in geometries(),
        mode in streaming_mode(),
        levels in levels(),
    ) {
        let mut graph = building(&geometries, &[]);
        let root = graph.root_id().expect("root");
        let filter = LodFilter::new(mode, levels);

        filter
            .remove_geometries(&mut graph, root, &mut PruneLog::default())
            .expect("prunes");

        for level in lod_levels(&graph) {
            let lod = level.and_then(|level| Lod::new(level).ok());
            prop_assert!(filter.filter(lod));
        }
    }

    /// Property: after cleanup no reference points at an object removed by
    /// that cleanup, and referenced templates stay reachable.
    #[test]
    fn cleanup_leaves_no_dangling_references(
        geometries in geometries(),
        keep in 0_u8..=4,
        implicit_lod in 0_u8..=4,
    ) {
        let mut graph = building(&geometries, &[]);
        let mut with_implicit = GraphBuilder::building("b1");
        let implicit_root = with_implicit.root();
        with_implicit.implicit(implicit_root, "tree", Some(implicit_lod));
        let part = with_implicit.part(implicit_root, "p1");
        with_implicit.geometry(part, "gp", Some(keep));
        with_implicit.implicit_reference(part, "tree", Some(keep), ImplicitPlacement::default());
        let mut implicit_graph = with_implicit.finish();

        let filter = LodFilter::new(LodMode::Keep, [Lod::new(keep).expect("valid level")]);
        for target in [&mut graph, &mut implicit_graph] {
            let report = Postprocessor::new(filter.clone(), Direction::Import)
                .process(target, &mut PruneLog::default())
                .expect("processes");
            assert_no_dangling(target, &report)?;
        }
    }
}

fn assert_no_dangling(
    graph: &FeatureGraph,
    report: &PostprocessReport,
) -> Result<(), TestCaseError> {
    let attached = graph.attached();
    let live_implicit: BTreeSet<&str> = attached
        .iter()
        .filter_map(|id| graph.get(*id))
        .filter(|node| matches!(node.kind, NodeKind::ImplicitGeometry(_)))
        .filter_map(|node| node.object_id.as_deref())
        .collect();
    let known_implicit: BTreeSet<&str> = graph
        .iter()
        .filter(|(_, node)| matches!(node.kind, NodeKind::ImplicitGeometry(_)))
        .filter_map(|(_, node)| node.object_id.as_deref())
        .collect();
    for id in &attached {
        let Some(node) = graph.get(*id) else { continue };
        match &node.kind {
            NodeKind::Feature(feature) => {
                for property in &feature.properties {
                    let Some(href) = property.link().and_then(|link| link.reference()) else {
                        continue;
                    };
                    match property.value {
                        PropertyValue::Feature { .. } => {
                            prop_assert!(!report.removed_features.contains(href));
                        }
                        PropertyValue::ImplicitGeometry { .. } if known_implicit.contains(href) => {
                            prop_assert!(live_implicit.contains(href));
                        }
                        _ => {}
                    }
                }
            }
            NodeKind::Appearance(appearance) => {
                for href in appearance.surface_data.iter().filter_map(|link| link.reference()) {
                    prop_assert!(!report.removed_surface_data.contains(href));
                }
            }
            _ => {}
        }
    }
    Ok(())
}
