//! Build file → raw nodes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use rustc_hash::FxHashSet;

use super::cache::OnceMap;
use super::job::{Job, JobScheduler};
use super::ParsePipeline;
use crate::base::constants::NAME_ATTR;
use crate::base::{BuildTarget, ParseKey, RawNode, RawNodeSet};
use crate::cell::Cell;
use crate::daemon::NodeCache;
use crate::error::{ParseError, Result};
use crate::events::{EventSink, ParseEvent};
use crate::parser::{ParsedBuildFile, ParserPool};

/// Parses each build file at most once per build, keeping all of its
/// declarations together.
pub struct RawNodeParsePipeline {
    cache: OnceMap<ParseKey<PathBuf>, RawNodeSet>,
    node_cache: Arc<dyn NodeCache<PathBuf, RawNodeSet>>,
    pool: Arc<ParserPool>,
    jobs: JobScheduler,
    events: Arc<dyn EventSink>,
    processed_bytes: Arc<AtomicU64>,
    closed: AtomicBool,
}

impl RawNodeParsePipeline {
    pub fn new(
        node_cache: Arc<dyn NodeCache<PathBuf, RawNodeSet>>,
        pool: Arc<ParserPool>,
        jobs: JobScheduler,
        events: Arc<dyn EventSink>,
        processed_bytes: Arc<AtomicU64>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache: OnceMap::new(),
            node_cache,
            pool,
            jobs,
            events,
            processed_bytes,
            closed: AtomicBool::new(false),
        })
    }

    /// All raw nodes of `build_file` as the shared, immutable set.
    pub fn get_node_set(&self, cell: &Arc<Cell>, build_file: &Path) -> Result<RawNodeSet> {
        self.ensure_open()?;
        let key = ParseKey::new(cell.root(), build_file.to_path_buf());
        self.cache.get_or_compute(&key, || {
            if let Some(nodes) = self.node_cache.lookup(cell, &key.key) {
                tracing::trace!(build_file = %build_file.display(), "raw nodes from daemon cache");
                return Ok(nodes);
            }
            let nodes = self.parse(cell, build_file)?;
            Ok(self.node_cache.store(cell, key.key.clone(), nodes))
        })
    }

    /// Raw nodes of `build_file` if this build already parsed it.
    pub fn get_if_parsed(&self, cell: &Cell, build_file: &Path) -> Option<RawNodeSet> {
        self.cache
            .get_if_present(&ParseKey::new(cell.root(), build_file.to_path_buf()))
    }

    fn parse(&self, cell: &Cell, build_file: &Path) -> Result<RawNodeSet> {
        self.events.post(&ParseEvent::BuildFileParseStarted {
            build_file: build_file.to_path_buf(),
        });

        let parsed = {
            let mut lease = self.pool.borrow(cell)?;
            let outcome = lease.parse_build_file(cell, build_file);
            match outcome {
                Ok(parsed) => parsed,
                Err(err) if err.is_worker_failure() => {
                    if let Err(close_err) = lease.discard() {
                        tracing::warn!(error = %close_err, "failed to close broken parser");
                    }
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        };

        self.processed_bytes
            .fetch_add(parsed.processed_bytes, Ordering::Relaxed);
        let processed_bytes = parsed.processed_bytes;
        let nodes = to_raw_nodes(cell, build_file, parsed)?;
        self.events.post(&ParseEvent::BuildFileParseFinished {
            build_file: build_file.to_path_buf(),
            processed_bytes,
            nodes: nodes.len(),
        });
        Ok(nodes)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(ParseError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

fn to_raw_nodes(cell: &Cell, build_file: &Path, parsed: ParsedBuildFile) -> Result<RawNodeSet> {
    let base_path = cell.base_path_of(build_file)?;
    let mut seen = FxHashSet::default();
    let mut nodes = Vec::with_capacity(parsed.declarations.len());
    for (index, declaration) in parsed.declarations.into_iter().enumerate() {
        let name = match declaration.get(NAME_ATTR).and_then(|v| v.as_str()) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                return Err(ParseError::parse_failure(
                    build_file,
                    None,
                    format!("declaration #{} has no `{}`", index, NAME_ATTR),
                ));
            }
        };
        if !seen.insert(name.clone()) {
            return Err(ParseError::parse_failure(
                build_file,
                None,
                format!("duplicate target `{}`", name),
            ));
        }
        nodes.push(Arc::new(RawNode::new(
            cell.root(),
            build_file,
            &base_path,
            name,
            declaration,
        )));
    }
    Ok(nodes.into())
}

impl ParsePipeline for RawNodeParsePipeline {
    type Node = Arc<RawNode>;

    fn get_node(&self, cell: &Arc<Cell>, target: &BuildTarget) -> Result<Arc<RawNode>> {
        let build_file = cell.build_file_for(target);
        let nodes = self.get_node_set(cell, &build_file)?;
        nodes
            .iter()
            .find(|node| node.name() == target.short_name())
            .cloned()
            .ok_or_else(|| ParseError::NoSuchTarget {
                target: target.to_string(),
                build_file,
            })
    }

    fn get_node_job(self: &Arc<Self>, cell: &Arc<Cell>, target: &BuildTarget) -> Job<Arc<RawNode>> {
        if let Err(err) = self.ensure_open() {
            return Job::completed(Err(err));
        }
        let this = Arc::clone(self);
        let cell = Arc::clone(cell);
        let target = target.clone();
        self.jobs
            .spawn("raw node", move || this.get_node(&cell, &target))
    }

    fn get_all_nodes(&self, cell: &Arc<Cell>, build_file: &Path) -> Result<Vec<Arc<RawNode>>> {
        Ok(self.get_node_set(cell, build_file)?.to_vec())
    }

    fn get_all_nodes_job(
        self: &Arc<Self>,
        cell: &Arc<Cell>,
        build_file: &Path,
    ) -> Job<Vec<Arc<RawNode>>> {
        if let Err(err) = self.ensure_open() {
            return Job::completed(Err(err));
        }
        let this = Arc::clone(self);
        let cell = Arc::clone(cell);
        let build_file = build_file.to_path_buf();
        self.jobs
            .spawn("raw nodes", move || this.get_all_nodes(&cell, &build_file))
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let pending = self.cache.pending();
        self.cache.clear();
        if pending > 0 {
            return Err(ParseError::InFlightAtClose {
                pipeline: "raw node",
                pending,
            });
        }
        Ok(())
    }
}
