//! Behavioural coverage for the init, import and export commands.

use super::*;
use crate::export::{ExportConfig, ExportSummary, execute_export};
use crate::import::{ImportConfig, ImportSummary, execute_import};
use crate::init::{InitConfig, run_init_with};
use camino::Utf8PathBuf;
use citydb_core::FeatureGraph;
use citydb_core::test_support::GraphBuilder;
use citydb_transfer::{ExportOptions, ImportOptions};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::cell::RefCell;
use tempfile::TempDir;

struct CliWorld {
    _workspace: TempDir,
    root: Utf8PathBuf,
    inputs: RefCell<Vec<Utf8PathBuf>>,
    imported: RefCell<Option<Result<Vec<ImportSummary>, CliError>>>,
    exported: RefCell<Option<Vec<ExportSummary>>>,
}

impl CliWorld {
    fn new() -> Self {
        let workspace = TempDir::new().expect("create workspace");
        let root =
            Utf8PathBuf::from_path_buf(workspace.path().to_path_buf()).expect("utf-8 workspace");
        Self {
            _workspace: workspace,
            root,
            inputs: RefCell::new(Vec::new()),
            imported: RefCell::new(None),
            exported: RefCell::new(None),
        }
    }

    fn database(&self) -> Utf8PathBuf {
        self.root.join("city.db")
    }

    fn output(&self) -> Utf8PathBuf {
        self.root.join("out")
    }

    fn imported_feature(&self) -> i64 {
        let imported = self.imported.borrow();
        imported
            .as_ref()
            .expect("import ran")
            .as_ref()
            .expect("import succeeded")
            .first()
            .expect("one summary")
            .feature_id
    }
}

#[fixture]
fn cli_world() -> CliWorld {
    CliWorld::new()
}

#[given("an initialised database")]
fn initialised_database(#[from(cli_world)] world: &CliWorld) {
    let config = InitConfig {
        database: world.database(),
        srid: 25832,
    };
    let mut sink = Vec::new();
    run_init_with(&config, &mut sink).expect("init succeeds");
}

#[given("a feature graph file for the building b1")]
fn graph_file(#[from(cli_world)] world: &CliWorld) {
    let mut builder = GraphBuilder::building("b1");
    let root = builder.root();
    builder.geometry(root, "g1", Some(2));
    let path = world.root.join("b1.json");
    let payload = serde_json::to_vec(&builder.finish()).expect("encode graph");
    std::fs::write(&path, payload).expect("write graph file");
    world.inputs.borrow_mut().push(path);
}

#[given("a malformed feature graph file")]
fn malformed_file(#[from(cli_world)] world: &CliWorld) {
    let path = world.root.join("broken.json");
    std::fs::write(&path, b"{ not json").expect("write graph file");
    world.inputs.borrow_mut().push(path);
}

#[when("the graph files are imported")]
fn import_files(#[from(cli_world)] world: &CliWorld) {
    let config = ImportConfig {
        database: world.database(),
        inputs: world.inputs.borrow().clone(),
        options: ImportOptions::default().with_threads(2),
    };
    let outcome = config
        .validate_sources()
        .and_then(|()| execute_import(&config));
    world.imported.replace(Some(outcome));
}

#[when("the imported feature is exported")]
fn export_feature(#[from(cli_world)] world: &CliWorld) {
    let config = ExportConfig {
        database: world.database(),
        feature_ids: vec![world.imported_feature()],
        output: world.output(),
        options: ExportOptions::default().with_threads(2),
    };
    config.validate_sources().expect("valid export sources");
    let summaries = execute_export(&config).expect("export succeeds");
    world.exported.replace(Some(summaries));
}

#[then("the output directory holds the feature graph of b1")]
fn output_holds_graph(#[from(cli_world)] world: &CliWorld) {
    let exported = world.exported.borrow();
    let summary = exported
        .as_ref()
        .and_then(|summaries| summaries.first())
        .expect("one exported feature");
    assert_eq!(summary.feature_id, world.imported_feature());
    assert_eq!(
        summary.path,
        world
            .output()
            .join(format!("feature_{}.json", summary.feature_id))
    );

    let payload = std::fs::read(&summary.path).expect("read exported graph");
    let graph: FeatureGraph = serde_json::from_slice(&payload).expect("decode exported graph");
    let root = graph.root_id().expect("root");
    assert_eq!(graph.object_id(root), Some("b1"));
    assert_eq!(graph.len(), summary.nodes);
}

#[then("the import fails naming the malformed file")]
fn import_fails(#[from(cli_world)] world: &CliWorld) {
    let imported = world.imported.borrow();
    let error = imported
        .as_ref()
        .expect("import ran")
        .as_ref()
        .expect_err("import should fail");
    match error {
        CliError::ParseGraph { path, .. } => assert_eq!(*path, world.root.join("broken.json")),
        other => panic!("expected ParseGraph, found {other:?}"),
    }
}

#[scenario(path = "tests/features/cli.feature", index = 0)]
fn import_then_export(#[from(cli_world)] world: CliWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/cli.feature", index = 1)]
fn malformed_graph_file(#[from(cli_world)] world: CliWorld) {
    let _ = world;
}
