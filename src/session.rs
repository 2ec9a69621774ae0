//! Per-build parse session.
//!
//! [`PerBuildState`] wires every other layer together for one build and owns
//! their lifetime:
//!
//! ```text
//! CellRegistry ──registers──▶ SymlinkTracker ◀──checks── TargetNodeParsePipeline
//!                                                            │
//!                                                            ▼
//!                        ParserPool ◀──borrows── RawNodeParsePipeline
//! ```
//!
//! Closing is bounded: in-flight work gets `close_timeout_ms` to finish,
//! then every owned resource is closed and all failures are reported
//! together.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use rayon::ThreadPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::base::{BuildTarget, RawNode, TargetNode};
use crate::cell::{Cell, CellRegistry};
use crate::config::ParserConfig;
use crate::daemon::DaemonicParserState;
use crate::error::{ParseError, Result};
use crate::events::{EventSink, ParseEvent, TracingEventSink};
use crate::marshal::{DefaultMarshaller, Marshaller};
use crate::parser::{BuildFileParserFactory, ParserPool};
use crate::pipeline::{
    InFlight, InFlightGuard, Job, JobScheduler, ParsePipeline, RawNodeParsePipeline,
    TargetNodeParsePipeline,
};
use crate::symlink::{SymlinkRecord, SymlinkTracker};

/// Everything one build needs to turn targets into nodes.
pub struct PerBuildState {
    build_id: Uuid,
    config: ParserConfig,
    daemon: Arc<DaemonicParserState>,
    registry: CellRegistry,
    tracker: Arc<SymlinkTracker>,
    pool: Arc<ParserPool>,
    raw: Arc<RawNodeParsePipeline>,
    targets: Arc<TargetNodeParsePipeline>,
    in_flight: Arc<InFlight>,
    processed_bytes: Arc<AtomicU64>,
    shutdown: CancellationToken,
    events: Arc<dyn EventSink>,
    closed: AtomicBool,
}

pub struct PerBuildStateBuilder {
    root_cell: Arc<Cell>,
    factory: Arc<dyn BuildFileParserFactory>,
    marshaller: Option<Arc<dyn Marshaller>>,
    daemon: Option<Arc<DaemonicParserState>>,
    executor: Option<Arc<ThreadPool>>,
    events: Option<Arc<dyn EventSink>>,
}

impl PerBuildStateBuilder {
    /// Marshaller for target nodes; [`DefaultMarshaller`] otherwise.
    pub fn marshaller(mut self, marshaller: Arc<dyn Marshaller>) -> Self {
        self.marshaller = Some(marshaller);
        self
    }

    /// Long-lived caches shared with earlier and later builds.
    pub fn daemon(mut self, daemon: Arc<DaemonicParserState>) -> Self {
        self.daemon = Some(daemon);
        self
    }

    /// Shared executor; a pool sized by `num_parsing_threads` otherwise.
    pub fn executor(mut self, executor: Arc<ThreadPool>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<PerBuildState> {
        let config = self.root_cell.config().clone();
        config.validate()?;

        let executor = match self.executor {
            Some(executor) => executor,
            None => Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(config.num_parsing_threads)
                    .thread_name(|i| format!("cellparse-{}", i))
                    .build()
                    .map_err(|e| ParseError::Executor(e.to_string()))?,
            ),
        };
        let daemon = self.daemon.unwrap_or_default();
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(TracingEventSink));
        let marshaller = self
            .marshaller
            .unwrap_or_else(|| Arc::new(DefaultMarshaller::default()));

        let build_id = Uuid::new_v4();
        let in_flight = Arc::new(InFlight::new());
        let processed_bytes = Arc::new(AtomicU64::new(0));
        let shutdown = CancellationToken::new();
        let jobs = JobScheduler::new(executor, Arc::clone(&in_flight));

        let tracker = Arc::new(SymlinkTracker::new(
            Some(Arc::clone(&daemon)),
            Arc::clone(&events),
        ));
        let registry = CellRegistry::new(tracker.clone());
        registry.register(Arc::clone(&self.root_cell));

        let pool = Arc::new(ParserPool::new(
            config.num_parsing_threads,
            self.factory,
            config.enable_profiling,
            config.borrow_timeout(),
            Arc::clone(&events),
        ));
        let raw = RawNodeParsePipeline::new(
            daemon.raw_node_cache(),
            Arc::clone(&pool),
            jobs.clone(),
            Arc::clone(&events),
            Arc::clone(&processed_bytes),
        );
        let targets = TargetNodeParsePipeline::new(
            &config,
            Arc::clone(&raw),
            daemon.target_node_cache(),
            marshaller,
            tracker.clone(),
            jobs,
            Arc::clone(&events),
            shutdown.clone(),
        );

        tracing::info!(
            %build_id,
            root = %self.root_cell.root().display(),
            threads = config.num_parsing_threads,
            parallel = config.enable_parallel_parsing,
            speculative = config.speculation_enabled(),
            "starting parse session"
        );
        events.post(&ParseEvent::ParseStarted { build_id });

        Ok(PerBuildState {
            build_id,
            config,
            daemon,
            registry,
            tracker,
            pool,
            raw,
            targets,
            in_flight,
            processed_bytes,
            shutdown,
            events,
            closed: AtomicBool::new(false),
        })
    }
}

impl PerBuildState {
    pub fn builder(
        root_cell: Arc<Cell>,
        parser_factory: Arc<dyn BuildFileParserFactory>,
    ) -> PerBuildStateBuilder {
        PerBuildStateBuilder {
            root_cell,
            factory: parser_factory,
            marshaller: None,
            daemon: None,
            executor: None,
            events: None,
        }
    }

    pub fn build_id(&self) -> Uuid {
        self.build_id
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn daemon(&self) -> &Arc<DaemonicParserState> {
        &self.daemon
    }

    /// Cells registered so far, the root cell included.
    pub fn cells(&self) -> Vec<Arc<Cell>> {
        self.registry.cells()
    }

    /// Bytes the parsers processed in this build.
    pub fn parse_processed_bytes(&self) -> u64 {
        self.processed_bytes.load(Ordering::Relaxed)
    }

    pub fn symlink_records(&self) -> Vec<SymlinkRecord> {
        self.tracker.records()
    }

    /// The cell owning `target`, discovering it if needed.
    pub fn resolve(&self, target: &BuildTarget) -> Result<Arc<Cell>> {
        let _guard = self.enter()?;
        self.registry.resolve(target)
    }

    pub fn target_node(&self, target: &BuildTarget) -> Result<Arc<TargetNode>> {
        let _guard = self.enter()?;
        let cell = self.registry.resolve(target)?;
        self.targets.get_node(&cell, target)
    }

    pub fn target_node_job(&self, target: &BuildTarget) -> Job<Arc<TargetNode>> {
        let cell = self.enter().and_then(|_guard| self.registry.resolve(target));
        match cell {
            Ok(cell) => self.targets.get_node_job(&cell, target),
            Err(err) => Job::completed(Err(err)),
        }
    }

    /// Every target node declared in `build_file` of `cell`.
    pub fn all_target_nodes(&self, cell: &Arc<Cell>, build_file: &Path) -> Result<Vec<Arc<TargetNode>>> {
        let _guard = self.enter()?;
        let cell = self.owning(cell, build_file)?;
        self.targets.get_all_nodes(&cell, build_file)
    }

    pub fn all_target_nodes_job(
        &self,
        cell: &Arc<Cell>,
        build_file: &Path,
    ) -> Job<Vec<Arc<TargetNode>>> {
        let cell = self
            .enter()
            .and_then(|_guard| self.owning(cell, build_file));
        match cell {
            Ok(cell) => self.targets.get_all_nodes_job(&cell, build_file),
            Err(err) => Job::completed(Err(err)),
        }
    }

    /// Every raw node declared in `build_file` of `cell`.
    pub fn all_raw_nodes(&self, cell: &Arc<Cell>, build_file: &Path) -> Result<Vec<Arc<RawNode>>> {
        let _guard = self.enter()?;
        let cell = self.owning(cell, build_file)?;
        self.raw.get_all_nodes(&cell, build_file)
    }

    /// Stop the session and release its parsers.
    ///
    /// Waits up to `close_timeout_ms` for running work, then closes the
    /// typed pipeline, the raw pipeline, the parser pool and the symlink
    /// tracker. Every step is attempted; failures are returned together.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(ParseError::SessionClosed);
        }
        self.shutdown.cancel();
        if !self.in_flight.wait_idle(self.config.close_timeout()) {
            tracing::warn!(
                build_id = %self.build_id,
                pending = self.in_flight.count(),
                timeout = ?self.config.close_timeout(),
                "closing parse session with work still in flight"
            );
        }

        let mut errors = Vec::new();
        for result in [
            self.targets.close(),
            self.raw.close(),
            self.pool.close(),
            self.tracker.close(),
        ] {
            match result {
                Ok(()) => {}
                Err(ParseError::Close { errors: nested }) => errors.extend(nested),
                Err(err) => errors.push(err),
            }
        }

        let processed_bytes = self.parse_processed_bytes();
        tracing::info!(
            build_id = %self.build_id,
            processed_bytes,
            failures = errors.len(),
            "closed parse session"
        );
        self.events.post(&ParseEvent::ParseFinished {
            build_id: self.build_id,
            processed_bytes,
        });
        ParseError::from_close_errors(errors)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Track an operation; fails once the session is closed.
    fn enter(&self) -> Result<InFlightGuard> {
        let guard = self.in_flight.enter();
        if self.is_closed() {
            return Err(ParseError::SessionClosed);
        }
        Ok(guard)
    }

    /// Register `cell` and check that it contains `build_file`.
    fn owning(&self, cell: &Arc<Cell>, build_file: &Path) -> Result<Arc<Cell>> {
        if !cell.owns(build_file) {
            return Err(ParseError::BuildFileOutsideCell {
                build_file: build_file.to_path_buf(),
                cell_root: cell.root().to_path_buf(),
            });
        }
        Ok(self.registry.register(Arc::clone(cell)))
    }
}

impl Drop for PerBuildState {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(err) = self.close() {
            tracing::warn!(build_id = %self.build_id, error = %err, "parse session closed on drop with errors");
        }
    }
}
