//! Model-to-database import.
//!
//! Each worker owns one [`ImportContext`]. Importing a feature runs the
//! postprocessor, pre-allocates every primary key in batched sequence
//! requests, resolves references to rows stored by earlier imports and then
//! writes all rows in one transaction.

mod writer;

use std::sync::Arc;

use citydb_core::{
    Direction, FeatureGraph, GraphError, PostprocessReport, Postprocessor, PruneLog,
    SequenceAllocator, WritePlan,
};
use log::{debug, warn};

use crate::error::{SessionError, TransferError};
use crate::export::capped;
use crate::options::ImportOptions;
use crate::session::{Session, SessionState, TransferHandle, WorkerContext};
use crate::sqlite::{PooledConnection, SqliteAdapter, StoredImplicitGeometries, find_stored};

use writer::PlanWriter;

/// Result of importing one feature tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    /// Primary key of the root feature.
    pub feature_id: i64,
    /// Object id of the root feature.
    pub object_id: Option<String>,
    /// Rows written across all tables.
    pub rows: usize,
    /// Object ids referenced by the tree but found nowhere.
    pub unresolved: Vec<String>,
    /// What postprocessing removed before writing.
    pub report: PostprocessReport,
}

/// Per-worker import state.
#[derive(Debug)]
pub struct ImportContext {
    adapter: Arc<SqliteAdapter>,
    connection: PooledConnection,
    postprocessor: Postprocessor,
    log: PruneLog,
}

impl ImportContext {
    /// Context borrowing one connection from `adapter` until it is closed.
    ///
    /// # Errors
    /// Returns [`TransferError::Pool`] when no connection can be obtained.
    pub fn new(adapter: Arc<SqliteAdapter>, options: &ImportOptions) -> Result<Self, TransferError> {
        let connection = adapter.pool().acquire(false)?;
        Ok(Self {
            adapter,
            connection,
            postprocessor: Postprocessor::new(options.lod.clone(), Direction::Import)
                .with_appearances(options.import_appearances),
            log: PruneLog::default(),
        })
    }

    /// Persist `graph`.
    ///
    /// Nothing is written when any step fails.
    ///
    /// # Errors
    /// Fails when the graph is inconsistent, sequence allocation fails, the
    /// feature type is unknown or a statement fails.
    pub fn import_feature(&mut self, graph: FeatureGraph) -> Result<ImportOutcome, TransferError> {
        let outcome = self.write_graph(graph);
        self.log.clear();
        outcome
    }

    fn write_graph(&mut self, mut graph: FeatureGraph) -> Result<ImportOutcome, TransferError> {
        let assigned = graph.ensure_object_ids();
        if assigned > 0 {
            debug!("assigned {assigned} generated object id(s)");
        }
        let report = self.postprocessor.process(&mut graph, &mut self.log)?;
        let object_id = graph.object_id(graph.root_id()?).map(str::to_owned);

        let mut values = {
            let lookup = StoredImplicitGeometries::new(&self.connection);
            SequenceAllocator::new(self.adapter.sequences(), &lookup).prepare(&graph)?
        };
        let mut plan = WritePlan::build(&mut graph, &mut values)?;
        let feature_id = plan.root_feature_id().ok_or(GraphError::MissingRoot)?;

        let connection = &self.connection;
        let unresolved = plan
            .resolve_deferred(|cache_type, object_id| find_stored(connection, cache_type, object_id))
            .map_err(TransferError::sqlite("resolve stored references"))?;
        for object_id in &unresolved {
            warn!("feature {feature_id} references unknown object {object_id}");
        }

        let transaction = self
            .connection
            .transaction()
            .map_err(TransferError::sqlite("begin import transaction"))?;
        PlanWriter {
            transaction: &transaction,
            mapping: self.adapter.mapping(),
        }
        .write(&plan)?;
        transaction
            .commit()
            .map_err(TransferError::sqlite(format!("commit feature {feature_id}")))?;

        debug!("imported feature {feature_id} as {} row(s)", plan.row_count());
        Ok(ImportOutcome {
            feature_id,
            object_id,
            rows: plan.row_count(),
            unresolved,
            report,
        })
    }
}

impl WorkerContext for ImportContext {
    fn close(self) -> Result<(), TransferError> {
        drop(self.connection);
        Ok(())
    }
}

/// Import session over one database.
#[derive(Debug)]
pub struct Importer {
    adapter: Arc<SqliteAdapter>,
    options: Arc<ImportOptions>,
    session: Session<ImportContext>,
}

impl Importer {
    /// Importer that has not started yet.
    #[must_use]
    pub fn new(adapter: Arc<SqliteAdapter>, options: ImportOptions) -> Self {
        Self {
            adapter,
            options: Arc::new(options),
            session: Session::new(),
        }
    }

    /// Spawn the worker pool, capped at the connection pool capacity.
    ///
    /// # Errors
    /// Fails when the importer was already started or closed, or a worker
    /// thread cannot be spawned.
    pub fn start(&self) -> Result<(), SessionError> {
        let settings = capped(self.options.pool_settings(), self.adapter.pool().capacity());
        let adapter = Arc::clone(&self.adapter);
        let options = Arc::clone(&self.options);
        self.session.start(settings, "citydb-import", move || {
            ImportContext::new(Arc::clone(&adapter), &options)
        })
    }

    /// Queue `graph` for import.
    pub fn submit(&self, graph: FeatureGraph) -> TransferHandle<ImportOutcome> {
        self.session
            .submit(move |context: &mut ImportContext| context.import_feature(graph))
    }

    /// Lifecycle position.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Whether no import has failed so far.
    #[must_use]
    pub fn was_successful(&self) -> bool {
        self.session.was_successful()
    }

    /// Wait for queued work and release every connection.
    ///
    /// # Errors
    /// Returns [`SessionError::Close`] when a worker context failed to close.
    pub fn close(&self) -> Result<(), SessionError> {
        self.session.close()
    }
}
