//! Database-to-model export.
//!
//! An [`Exporter`] runs an export [`Session`]. Each worker owns one
//! [`ExportContext`], which holds a pooled connection, a reference cache and a
//! postprocessor for the lifetime of the session.

mod external;
mod reader;

use std::sync::Arc;

use citydb_core::{
    Direction, FeatureGraph, NodeKind, PostprocessReport, Postprocessor, PruneLog, ReferenceCache,
    SrsResolver,
};
use log::{debug, warn};

use crate::error::{SessionError, TransferError};
use crate::options::{ExportOptions, PoolSettings};
use crate::session::{Session, SessionState, TransferHandle, WorkerContext};
use crate::sqlite::{PooledConnection, SqliteAdapter};

use external::ExternalFiles;
use reader::FeatureReader;

/// A feature read back from the database.
#[derive(Debug, Clone)]
pub struct ExportedFeature {
    /// Caller-chosen position in the output, for ordered writers.
    pub sequence_id: u64,
    /// Primary key of the root feature.
    pub database_id: i64,
    /// The materialized tree.
    pub graph: FeatureGraph,
    /// What postprocessing removed.
    pub report: PostprocessReport,
}

/// Per-worker export state.
#[derive(Debug)]
pub struct ExportContext {
    adapter: Arc<SqliteAdapter>,
    connection: PooledConnection,
    options: Arc<ExportOptions>,
    external: Option<ExternalFiles>,
    postprocessor: Postprocessor,
    cache: ReferenceCache,
    log: PruneLog,
}

impl ExportContext {
    /// Context borrowing one connection from `adapter` until it is closed.
    ///
    /// # Errors
    /// Returns [`TransferError::Pool`] when no connection can be obtained.
    pub fn new(
        adapter: Arc<SqliteAdapter>,
        options: Arc<ExportOptions>,
    ) -> Result<Self, TransferError> {
        let connection = adapter.pool().acquire(true)?;
        let postprocessor = Postprocessor::new(options.lod.clone(), Direction::Export)
            .with_appearances(options.export_appearances);
        Ok(Self {
            external: options.external_files.as_ref().map(ExternalFiles::new),
            adapter,
            connection,
            options,
            postprocessor,
            cache: ReferenceCache::default(),
            log: PruneLog::default(),
        })
    }

    /// Read feature `id`, postprocess it and transform its envelopes to the
    /// target SRID.
    ///
    /// # Errors
    /// Fails when a row is missing or malformed, a statement fails, an image
    /// cannot be written or no transformation to the target SRID is known.
    pub fn export_feature(
        &mut self,
        id: i64,
    ) -> Result<(FeatureGraph, PostprocessReport), TransferError> {
        let outcome = self.read_and_process(id);
        self.cache.clear();
        self.log.clear();
        outcome
    }

    /// Read implicit geometry `id` with its template.
    ///
    /// # Errors
    /// Fails when the row is missing or malformed or a statement fails.
    pub fn export_implicit_geometry(&mut self, id: i64) -> Result<FeatureGraph, TransferError> {
        let outcome = self.reader().read_implicit_root(id);
        self.cache.clear();
        self.log.clear();
        outcome
    }

    fn reader(&mut self) -> FeatureReader<'_> {
        FeatureReader {
            connection: &self.connection,
            mapping: self.adapter.mapping(),
            options: &self.options,
            external: self.external.as_ref(),
            cache: &mut self.cache,
            log: &mut self.log,
            graph: FeatureGraph::new(),
        }
    }

    fn read_and_process(
        &mut self,
        id: i64,
    ) -> Result<(FeatureGraph, PostprocessReport), TransferError> {
        let mut graph = self.reader().read_root(id)?;
        let report = self.postprocessor.process(&mut graph, &mut self.log)?;
        if let Some(target_srid) = self.options.target_srid {
            transform_envelopes(&mut graph, self.adapter.srs(), target_srid)?;
        }
        debug!(
            "exported feature {id} with {} node(s), {} removed geometr(ies)",
            graph.len(),
            report.removed_geometries
        );
        Ok((graph, report))
    }
}

impl WorkerContext for ExportContext {
    fn close(self) -> Result<(), TransferError> {
        drop(self.connection);
        Ok(())
    }
}

fn transform_envelopes(
    graph: &mut FeatureGraph,
    srs: &dyn SrsResolver,
    target_srid: i32,
) -> Result<(), TransferError> {
    if srs.database_srid() == target_srid {
        return Ok(());
    }
    for id in graph.attached() {
        if let NodeKind::Feature(feature) = &mut graph.node_mut(id)?.kind {
            if feature.envelope.is_empty() {
                continue;
            }
            feature.envelope = srs
                .transform(&feature.envelope, target_srid)
                .map_err(|source| TransferError::Srs {
                    target_srid,
                    source,
                })?;
        }
    }
    Ok(())
}

/// Export session over one database.
///
/// # Examples
/// ```no_run
/// use std::sync::Arc;
///
/// use camino::Utf8Path;
/// use citydb_transfer::{ExportOptions, Exporter, SqliteAdapter};
///
/// let adapter = Arc::new(SqliteAdapter::open(Utf8Path::new("city.db"))?);
/// let exporter = Exporter::new(adapter, ExportOptions::default());
/// exporter.start()?;
/// let exported = exporter.submit(1, 0).wait()?;
/// println!("{} node(s)", exported.graph.len());
/// exporter.close()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct Exporter {
    adapter: Arc<SqliteAdapter>,
    options: Arc<ExportOptions>,
    session: Session<ExportContext>,
}

impl Exporter {
    /// Exporter that has not started yet.
    #[must_use]
    pub fn new(adapter: Arc<SqliteAdapter>, options: ExportOptions) -> Self {
        Self {
            adapter,
            options: Arc::new(options),
            session: Session::new(),
        }
    }

    /// Spawn the worker pool.
    ///
    /// The worker count is capped at the connection pool capacity.
    ///
    /// # Errors
    /// Fails when the exporter was already started or closed, or a worker
    /// thread cannot be spawned.
    pub fn start(&self) -> Result<(), SessionError> {
        let settings = capped(self.options.pool_settings(), self.adapter.pool().capacity());
        let adapter = Arc::clone(&self.adapter);
        let options = Arc::clone(&self.options);
        self.session.start(settings, "citydb-export", move || {
            ExportContext::new(Arc::clone(&adapter), Arc::clone(&options))
        })
    }

    /// Queue feature `feature_id` for export.
    pub fn submit(&self, feature_id: i64, sequence_id: u64) -> TransferHandle<ExportedFeature> {
        self.session.submit(move |context: &mut ExportContext| {
            let (graph, report) = context.export_feature(feature_id)?;
            Ok(ExportedFeature {
                sequence_id,
                database_id: feature_id,
                graph,
                report,
            })
        })
    }

    /// Queue implicit geometry `id` for export.
    pub fn submit_implicit_geometry(&self, id: i64) -> TransferHandle<FeatureGraph> {
        self.session
            .submit(move |context: &mut ExportContext| context.export_implicit_geometry(id))
    }

    /// Lifecycle position.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Whether no export has failed so far.
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

/// Limit `settings` to the number of available connections.
pub(crate) fn capped(settings: PoolSettings, connections: usize) -> PoolSettings {
    if settings.threads <= connections {
        return settings;
    }
    warn!(
        "limiting {} worker(s) to {connections} available connection(s)",
        settings.threads
    );
    PoolSettings {
        threads: connections,
        ..settings
    }
}
