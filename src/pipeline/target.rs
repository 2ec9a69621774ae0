//! Raw nodes → target nodes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashSet;
use rayon::prelude::*;
use rustc_hash::FxBuildHasher;
use smol_str::SmolStr;
use tokio_util::sync::CancellationToken;

use super::ParsePipeline;
use super::cache::OnceMap;
use super::job::{Job, JobScheduler};
use super::raw::RawNodeParsePipeline;
use crate::base::{BuildTarget, ParseKey, RawNode, TargetNode};
use crate::cell::Cell;
use crate::config::ParserConfig;
use crate::daemon::NodeCache;
use crate::error::{ParseError, Result};
use crate::events::{EventSink, ParseEvent};
use crate::marshal::Marshaller;
use crate::symlink::InputsUnderSymlinkListener;

/// Builds each target node at most once per build.
///
/// With speculative parsing on, the first request for a node of a build file
/// schedules the file's other declarations in the background.
pub struct TargetNodeParsePipeline {
    this: Weak<Self>,
    cache: OnceMap<ParseKey<BuildTarget>, Arc<TargetNode>>,
    node_cache: Arc<dyn NodeCache<BuildTarget, Arc<TargetNode>>>,
    raw: Arc<RawNodeParsePipeline>,
    marshaller: Arc<dyn Marshaller>,
    symlinks: Arc<dyn InputsUnderSymlinkListener>,
    jobs: JobScheduler,
    events: Arc<dyn EventSink>,
    parallel: bool,
    speculative: bool,
    shutdown: CancellationToken,
    /// Build files whose declarations were already scheduled or built.
    speculated: DashSet<ParseKey<PathBuf>, FxBuildHasher>,
    closed: AtomicBool,
}

impl TargetNodeParsePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &ParserConfig,
        raw: Arc<RawNodeParsePipeline>,
        node_cache: Arc<dyn NodeCache<BuildTarget, Arc<TargetNode>>>,
        marshaller: Arc<dyn Marshaller>,
        symlinks: Arc<dyn InputsUnderSymlinkListener>,
        jobs: JobScheduler,
        events: Arc<dyn EventSink>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            cache: OnceMap::new(),
            node_cache,
            raw,
            marshaller,
            symlinks,
            jobs,
            events,
            parallel: config.enable_parallel_parsing,
            speculative: config.speculation_enabled(),
            shutdown,
            speculated: DashSet::with_hasher(FxBuildHasher),
            closed: AtomicBool::new(false),
        })
    }

    pub fn raw(&self) -> &Arc<RawNodeParsePipeline> {
        &self.raw
    }

    /// Node for `target` if this build already created it.
    pub fn get_if_built(&self, cell: &Cell, target: &BuildTarget) -> Option<Arc<TargetNode>> {
        self.cache
            .get_if_present(&ParseKey::new(cell.root(), target.clone()))
    }

    fn build(&self, cell: &Arc<Cell>, target: &BuildTarget) -> Result<Arc<TargetNode>> {
        self.ensure_open()?;
        let key = ParseKey::new(cell.root(), target.clone());
        self.cache.get_or_compute(&key, || {
            if let Some(node) = self.node_cache.lookup(cell, target) {
                tracing::trace!(build_target = %target, "target node from daemon cache");
                return Ok(node);
            }
            let raw = self.raw.get_node(cell, target)?;
            let node = self.create(cell, target, &raw)?;
            Ok(self.node_cache.store(cell, target.clone(), node))
        })
    }

    fn create(&self, cell: &Cell, target: &BuildTarget, raw: &RawNode) -> Result<Arc<TargetNode>> {
        let node = self
            .marshaller
            .marshal(cell, target, raw)
            .map_err(|source| ParseError::TargetDefinition {
                target: target.to_string(),
                build_file: raw.build_file().to_path_buf(),
                source,
            })?;
        self.symlinks
            .on_target_node_created(cell, raw.build_file(), &node)?;
        self.events.post(&ParseEvent::TargetNodeCreated {
            target: target.clone(),
        });
        Ok(Arc::new(node))
    }

    /// Schedule the other declarations of `target`'s build file, once per file.
    fn speculate(&self, cell: &Arc<Cell>, target: &BuildTarget) {
        if !self.speculative || self.shutdown.is_cancelled() {
            return;
        }
        let build_file = cell.build_file_for(target);
        if !self
            .speculated
            .insert(ParseKey::new(cell.root(), build_file.clone()))
        {
            return;
        }
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let cell = Arc::clone(cell);
        let requested = target.unflavored();
        tracing::trace!(build_file = %build_file.display(), "scheduling speculative parse");
        // Detached: failures surface when the node is requested for real.
        let _ = self.jobs.spawn("speculative parse", move || {
            if this.shutdown.is_cancelled() {
                return Ok(());
            }
            let nodes = this.raw.get_node_set(&cell, &build_file)?;
            for raw in nodes.iter() {
                if this.shutdown.is_cancelled() {
                    tracing::debug!(build_file = %build_file.display(), "speculation cancelled");
                    break;
                }
                let sibling = declared_target(&cell, raw);
                if sibling == requested {
                    continue;
                }
                if let Err(err) = this.build(&cell, &sibling) {
                    tracing::trace!(build_target = %sibling, error = %err, "speculative node failed");
                }
            }
            Ok(())
        });
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(ParseError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

/// The unflavored target a raw node declares, named the way its cell is.
fn declared_target(cell: &Cell, raw: &RawNode) -> BuildTarget {
    raw.target().with_cell_name(cell.name().map(SmolStr::from))
}

impl ParsePipeline for TargetNodeParsePipeline {
    type Node = Arc<TargetNode>;

    fn get_node(&self, cell: &Arc<Cell>, target: &BuildTarget) -> Result<Arc<TargetNode>> {
        let node = self.build(cell, target)?;
        self.speculate(cell, target);
        Ok(node)
    }

    fn get_node_job(self: &Arc<Self>, cell: &Arc<Cell>, target: &BuildTarget) -> Job<Arc<TargetNode>> {
        if let Err(err) = self.ensure_open() {
            return Job::completed(Err(err));
        }
        let this = Arc::clone(self);
        let cell = Arc::clone(cell);
        let target = target.clone();
        self.jobs
            .spawn("target node", move || this.get_node(&cell, &target))
    }

    fn get_all_nodes(&self, cell: &Arc<Cell>, build_file: &Path) -> Result<Vec<Arc<TargetNode>>> {
        self.ensure_open()?;
        let nodes = self.raw.get_node_set(cell, build_file)?;
        self.speculated
            .insert(ParseKey::new(cell.root(), build_file.to_path_buf()));
        let targets: Vec<BuildTarget> = nodes.iter().map(|raw| declared_target(cell, raw)).collect();

        if self.parallel && targets.len() > 1 {
            self.jobs.executor().install(|| {
                targets
                    .par_iter()
                    .map(|target| self.build(cell, target))
                    .collect()
            })
        } else {
            targets
                .iter()
                .map(|target| self.build(cell, target))
                .collect()
        }
    }

    fn get_all_nodes_job(
        self: &Arc<Self>,
        cell: &Arc<Cell>,
        build_file: &Path,
    ) -> Job<Vec<Arc<TargetNode>>> {
        if let Err(err) = self.ensure_open() {
            return Job::completed(Err(err));
        }
        let this = Arc::clone(self);
        let cell = Arc::clone(cell);
        let build_file = build_file.to_path_buf();
        self.jobs
            .spawn("target nodes", move || this.get_all_nodes(&cell, &build_file))
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let pending = self.cache.pending();
        self.cache.clear();
        self.speculated.clear();
        if pending > 0 {
            return Err(ParseError::InFlightAtClose {
                pipeline: "target node",
                pending,
            });
        }
        Ok(())
    }
}
