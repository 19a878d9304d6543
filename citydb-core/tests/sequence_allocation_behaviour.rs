//! Behavioural tests for the two-pass sequence allocator.

use std::cell::RefCell;

use citydb_core::test_support::{
    FailingSequences, GraphBuilder, MemoryImplicitGeometries, MemorySequences,
};
use citydb_core::{
    FeatureGraph, PlannedTarget, PlannedValue, Sequence, SequenceAllocator, SequenceError,
    WritePlan,
};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

#[derive(Debug, Default)]
struct Allocation {
    graph: FeatureGraph,
    stored: Vec<(&'static str, i64)>,
    plan: Option<WritePlan>,
    error: Option<SequenceError>,
}

#[fixture]
fn allocation() -> RefCell<Allocation> {
    RefCell::new(Allocation::default())
}

fn plan_of(allocation: &Allocation) -> &WritePlan {
    allocation.plan.as_ref().expect("plan built")
}

#[given("a building and a part sharing the address addr-1")]
fn given_shared_address(#[from(allocation)] allocation: &RefCell<Allocation>) {
    let mut builder = GraphBuilder::building("b1");
    let root = builder.root();
    builder.address(root, "addr-1");
    let part = builder.part(root, "p1");
    builder.address(part, "addr-1");
    allocation.borrow_mut().graph = builder.finish();
}

#[given("a building placing the stored implicit geometry tree")]
fn given_stored_implicit(#[from(allocation)] allocation: &RefCell<Allocation>) {
    let mut builder = GraphBuilder::building("b1");
    let root = builder.root();
    builder.implicit(root, "tree", Some(2));
    let mut allocation = allocation.borrow_mut();
    allocation.graph = builder.finish();
    allocation.stored = vec![("tree", 42)];
}

#[given("a building with one LOD2 geometry")]
fn given_one_geometry(#[from(allocation)] allocation: &RefCell<Allocation>) {
    let mut builder = GraphBuilder::building("b1");
    let root = builder.root();
    builder.geometry(root, "g1", Some(2));
    allocation.borrow_mut().graph = builder.finish();
}

#[when("the write plan is built")]
fn when_plan_built(#[from(allocation)] allocation: &RefCell<Allocation>) {
    let mut allocation = allocation.borrow_mut();
    let sequences = MemorySequences::default();
    let lookup = MemoryImplicitGeometries::with(allocation.stored.iter().copied());
    let mut values = SequenceAllocator::new(&sequences, &lookup)
        .prepare(&allocation.graph)
        .expect("allocation succeeds");
    let plan = WritePlan::build(&mut allocation.graph, &mut values).expect("plan builds");
    allocation.plan = Some(plan);
}

#[when("values are requested from an unavailable sequence source")]
fn when_source_unavailable(#[from(allocation)] allocation: &RefCell<Allocation>) {
    let mut allocation = allocation.borrow_mut();
    let lookup = MemoryImplicitGeometries::default();
    let outcome = SequenceAllocator::new(&FailingSequences, &lookup).prepare(&allocation.graph);
    allocation.error = outcome.err();
}

#[then("one address row is planned")]
fn then_one_address(#[from(allocation)] allocation: &RefCell<Allocation>) {
    assert_eq!(plan_of(&allocation.borrow()).addresses.len(), 1);
}

#[then("both address properties point at the same row")]
fn then_same_address(#[from(allocation)] allocation: &RefCell<Allocation>) {
    let allocation = allocation.borrow();
    let plan = plan_of(&allocation);
    let address_id = plan.addresses.first().map(|row| row.id).expect("address row");
    let targets: Vec<_> = plan
        .properties
        .iter()
        .filter_map(|row| match &row.value {
            PlannedValue::Address { target } => Some(target.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        targets,
        vec![PlannedTarget::Id(address_id), PlannedTarget::Id(address_id)]
    );
}

#[then("no implicit geometry row is planned")]
fn then_no_implicit_row(#[from(allocation)] allocation: &RefCell<Allocation>) {
    let allocation = allocation.borrow();
    let plan = plan_of(&allocation);
    assert!(plan.implicit_geometries.is_empty());
    assert!(plan.geometries.is_empty(), "template must not be rewritten");
}

#[then("the implicit property points at the stored row")]
fn then_points_at_stored(#[from(allocation)] allocation: &RefCell<Allocation>) {
    let allocation = allocation.borrow();
    let target = plan_of(&allocation)
        .properties
        .iter()
        .find_map(|row| match &row.value {
            PlannedValue::ImplicitGeometry { target, .. } => Some(target.clone()),
            _ => None,
        });
    assert_eq!(target, Some(PlannedTarget::Id(42)));
}

#[then("allocation fails naming the feature sequence")]
fn then_fails(#[from(allocation)] allocation: &RefCell<Allocation>) {
    let allocation = allocation.borrow();
    let error = allocation.error.as_ref().expect("allocation failed");
    assert!(matches!(
        error,
        SequenceError::Source {
            sequence: Sequence::Feature,
            ..
        }
    ));
    assert!(error.to_string().contains("feature_seq"));
}

#[scenario(path = "tests/features/sequence_allocation.feature", index = 0)]
fn scenario_shared_address(allocation: RefCell<Allocation>) {
    let _ = allocation;
}

#[scenario(path = "tests/features/sequence_allocation.feature", index = 1)]
fn scenario_stored_implicit(allocation: RefCell<Allocation>) {
    let _ = allocation;
}

#[scenario(path = "tests/features/sequence_allocation.feature", index = 2)]
fn scenario_unavailable_source(allocation: RefCell<Allocation>) {
    let _ = allocation;
}
