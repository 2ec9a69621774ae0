//! Detection of target inputs reached through symbolic links.
//!
//! Symlinked inputs make file watching unreliable, so every node built in a
//! session is checked by a [`SymlinkTracker`]. What happens on a hit depends
//! on the owning cell's [`SymlinkPolicy`].

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rustc_hash::FxBuildHasher;

use crate::base::TargetNode;
use crate::cell::{Cell, CellRegistrationListener};
use crate::config::SymlinkPolicy;
use crate::daemon::DaemonicParserState;
use crate::error::{ParseError, Result};
use crate::events::{EventSink, ParseEvent};

/// An input of a target that lies under a symbolic link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkRecord {
    pub cell_root: PathBuf,
    pub build_file: PathBuf,
    /// Input path as declared, under the cell root.
    pub declared_path: PathBuf,
    /// The first path component of `declared_path` that is a link.
    pub link_path: PathBuf,
    /// Where `declared_path` really lives.
    pub real_path: PathBuf,
}

/// Called for every target node the typed pipeline creates.
pub trait InputsUnderSymlinkListener: Send + Sync {
    fn on_target_node_created(
        &self,
        declaring_cell: &Cell,
        build_file: &Path,
        node: &TargetNode,
    ) -> Result<()>;
}

/// Accepts every node; used where symlinks are not tracked.
pub struct IgnoreSymlinks;

impl InputsUnderSymlinkListener for IgnoreSymlinks {
    fn on_target_node_created(&self, _: &Cell, _: &Path, _: &TargetNode) -> Result<()> {
        Ok(())
    }
}

struct TrackedCell {
    cell: Arc<Cell>,
    canonical_root: PathBuf,
}

/// A link found on an input: the link itself and the input's real path.
type Resolution = Option<(PathBuf, PathBuf)>;

/// Walk results depend on the root the walk starts from.
type ResolutionKey = (PathBuf, PathBuf);

pub struct SymlinkTracker {
    cells: DashMap<PathBuf, TrackedCell, FxBuildHasher>,
    resolved: DashMap<ResolutionKey, Resolution, FxBuildHasher>,
    records: DashMap<(PathBuf, PathBuf), SymlinkRecord, FxBuildHasher>,
    daemon: Option<Arc<DaemonicParserState>>,
    events: Arc<dyn EventSink>,
    closed: AtomicBool,
}

impl SymlinkTracker {
    pub fn new(daemon: Option<Arc<DaemonicParserState>>, events: Arc<dyn EventSink>) -> Self {
        Self {
            cells: DashMap::with_hasher(FxBuildHasher),
            resolved: DashMap::with_hasher(FxBuildHasher),
            records: DashMap::with_hasher(FxBuildHasher),
            daemon,
            events,
            closed: AtomicBool::new(false),
        }
    }

    /// Start tracking `cell`. Registering the same root again is a no-op.
    pub fn register_cell(&self, root: &Path, cell: &Arc<Cell>) {
        if let Entry::Vacant(entry) = self.cells.entry(root.to_path_buf()) {
            let canonical_root = canonical_root(root);
            tracing::debug!(
                root = %root.display(),
                canonical = %canonical_root.display(),
                "tracking cell for symlinked inputs"
            );
            entry.insert(TrackedCell {
                cell: Arc::clone(cell),
                canonical_root,
            });
        }
    }

    /// Check every input of `node` and apply the owning cell's policy.
    pub fn register_inputs_under_symlinks(
        &self,
        owning_cell: &Cell,
        declaring_cell: &Cell,
        build_file: &Path,
        node: &TargetNode,
    ) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ParseError::SessionClosed);
        }
        let policy = owning_cell.config().build_file_symlinks;
        let root = self
            .cells
            .get(owning_cell.root())
            .map(|tracked| tracked.canonical_root.clone())
            .unwrap_or_else(|| canonical_root(owning_cell.root()));

        for input in &node.inputs {
            let Some((link_path, real_path)) = self.first_symlink(owning_cell.root(), &root, input)?
            else {
                continue;
            };
            if policy == SymlinkPolicy::Forbid {
                return Err(ParseError::InputUnderSymlink {
                    target: node.target().to_string(),
                    path: input.clone(),
                    real_path,
                });
            }

            let key = (build_file.to_path_buf(), input.clone());
            let Entry::Vacant(entry) = self.records.entry(key) else {
                continue;
            };
            let record = entry
                .insert(SymlinkRecord {
                    cell_root: owning_cell.root().to_path_buf(),
                    build_file: build_file.to_path_buf(),
                    declared_path: input.clone(),
                    link_path,
                    real_path,
                })
                .value()
                .clone();

            if policy == SymlinkPolicy::Warn {
                tracing::warn!(
                    build_target = %node.target(),
                    declaring_cell = %declaring_cell.root().display(),
                    path = %record.declared_path.display(),
                    real_path = %record.real_path.display(),
                    "input is under a symlink; changes to it may not be detected"
                );
            } else {
                tracing::debug!(path = %record.declared_path.display(), "input under symlink");
            }
            if let Some(daemon) = &self.daemon {
                daemon.record_input_under_symlink(build_file, &record.link_path);
            }
            self.events.post(&ParseEvent::InputUnderSymlink {
                build_file: record.build_file,
                path: record.declared_path,
                real_path: record.real_path,
            });
        }
        Ok(())
    }

    /// Every record so far, ordered by build file then input.
    pub fn records(&self) -> Vec<SymlinkRecord> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| {
            (&a.build_file, &a.declared_path).cmp(&(&b.build_file, &b.declared_path))
        });
        records
    }

    pub fn records_for(&self, cell_root: &Path) -> Vec<SymlinkRecord> {
        self.records()
            .into_iter()
            .filter(|record| record.cell_root == cell_root)
            .collect()
    }

    pub fn tracked_cells(&self) -> usize {
        self.cells.len()
    }

    /// Drop the caches. Fails if already closed.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(ParseError::SessionClosed);
        }
        self.resolved.clear();
        self.cells.clear();
        Ok(())
    }

    fn first_symlink(
        &self,
        declared_root: &Path,
        canonical_root: &Path,
        input: &Path,
    ) -> Result<Resolution> {
        let key = (canonical_root.to_path_buf(), input.to_path_buf());
        if let Some(known) = self.resolved.get(&key) {
            return Ok(known.value().clone());
        }
        let Ok(relative) = input.strip_prefix(declared_root) else {
            return Ok(None);
        };
        let resolution = walk(declared_root, canonical_root, relative)?;
        self.resolved.insert(key, resolution.clone());
        Ok(resolution)
    }
}

/// Walk `relative` component by component below the real root and stop at
/// the first link.
fn walk(declared_root: &Path, canonical_root: &Path, relative: &Path) -> Result<Resolution> {
    let mut declared = declared_root.to_path_buf();
    let mut current = canonical_root.to_path_buf();
    let mut components = relative.components();
    while let Some(component) = components.next() {
        declared.push(component);
        current.push(component);
        let metadata = match fs::symlink_metadata(&current) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(ParseError::io(&current, err)),
        };
        if metadata.file_type().is_symlink() {
            let target = fs::canonicalize(&current).map_err(|err| ParseError::io(&current, err))?;
            return Ok(Some((declared, target.join(components.as_path()))));
        }
    }
    Ok(None)
}

fn canonical_root(root: &Path) -> PathBuf {
    fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf())
}

impl CellRegistrationListener for SymlinkTracker {
    fn cell_registered(&self, root: &Path, cell: &Arc<Cell>) {
        self.register_cell(root, cell);
    }
}

impl InputsUnderSymlinkListener for SymlinkTracker {
    fn on_target_node_created(
        &self,
        declaring_cell: &Cell,
        build_file: &Path,
        node: &TargetNode,
    ) -> Result<()> {
        let owning = self
            .cells
            .get(node.target().cell_path())
            .map(|tracked| Arc::clone(&tracked.cell));
        let owning_cell = owning.as_deref().unwrap_or(declaring_cell);
        self.register_inputs_under_symlinks(owning_cell, declaring_cell, build_file, node)
    }
}
