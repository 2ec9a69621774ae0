//! Long-lived node caches shared by successive builds of a daemon.
//!
//! Per-build pipelines only memoize for one build; [`DaemonicParserState`]
//! keeps raw and target nodes across builds until the files they came from
//! change.

use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::{FxBuildHasher, FxHashSet};

use crate::base::{BuildTarget, ParseKey, RawNodeSet, TargetNode};
use crate::cell::Cell;

/// Get-or-compute storage consulted by the pipelines before doing work.
pub trait NodeCache<K, V>: Send + Sync {
    fn lookup(&self, cell: &Cell, key: &K) -> Option<V>;

    /// Store `value` unless another value is already present; returns the
    /// value that is kept.
    fn store(&self, cell: &Cell, key: K, value: V) -> V;
}

/// A [`NodeCache`] backed by a sharded map.
pub struct DaemonNodeCache<K, V> {
    entries: DashMap<ParseKey<K>, V, FxBuildHasher>,
}

impl<K, V> DaemonNodeCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::with_hasher(FxBuildHasher),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry matching `predicate`, returning how many went.
    pub fn invalidate_where(&self, predicate: impl Fn(&ParseKey<K>, &V) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, value| !predicate(key, value));
        before - self.entries.len()
    }
}

impl<K, V> Default for DaemonNodeCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> NodeCache<K, V> for DaemonNodeCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn lookup(&self, cell: &Cell, key: &K) -> Option<V> {
        self.entries
            .get(&ParseKey::new(cell.root(), key.clone()))
            .map(|entry| entry.value().clone())
    }

    fn store(&self, cell: &Cell, key: K, value: V) -> V {
        self.entries
            .entry(ParseKey::new(cell.root(), key))
            .or_insert(value)
            .value()
            .clone()
    }
}

pub type RawNodeCache = DaemonNodeCache<PathBuf, RawNodeSet>;
pub type TargetNodeCache = DaemonNodeCache<BuildTarget, Arc<TargetNode>>;

/// Parser state that outlives a single build.
#[derive(Default)]
pub struct DaemonicParserState {
    raw_nodes: Arc<RawNodeCache>,
    target_nodes: Arc<TargetNodeCache>,
    /// Symlink path → build files with an input reached through it.
    inputs_under_symlinks: DashMap<PathBuf, FxHashSet<PathBuf>, FxBuildHasher>,
}

impl DaemonicParserState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw_node_cache(&self) -> Arc<RawNodeCache> {
        Arc::clone(&self.raw_nodes)
    }

    pub fn target_node_cache(&self) -> Arc<TargetNodeCache> {
        Arc::clone(&self.target_nodes)
    }

    pub fn raw_node_count(&self) -> usize {
        self.raw_nodes.len()
    }

    pub fn target_node_count(&self) -> usize {
        self.target_nodes.len()
    }

    /// Remember that `build_file` depends on an input under `link`.
    pub fn record_input_under_symlink(&self, build_file: &Path, link: &Path) {
        self.inputs_under_symlinks
            .entry(link.to_path_buf())
            .or_default()
            .insert(build_file.to_path_buf());
    }

    /// Forget nodes that may be stale because `path` changed.
    ///
    /// Drops the nodes of `path` itself when it is a build file, and of every
    /// build file with an input reached through a symlink at, above or below
    /// `path`. Returns the number of cache entries removed.
    pub fn invalidate_path(&self, path: &Path) -> usize {
        let mut build_files: FxHashSet<PathBuf> = FxHashSet::default();
        build_files.insert(path.to_path_buf());
        for entry in self.inputs_under_symlinks.iter() {
            let link = entry.key();
            if link.starts_with(path) || path.starts_with(link) {
                build_files.extend(entry.value().iter().cloned());
            }
        }

        let removed = self
            .raw_nodes
            .invalidate_where(|key, _| build_files.contains(&key.key))
            + self
                .target_nodes
                .invalidate_where(|_, node| build_files.contains(node.build_file()));
        if removed > 0 {
            tracing::debug!(path = %path.display(), removed, "invalidated cached nodes");
        }
        removed
    }

    /// Forget everything parsed from the cell rooted at `root`.
    pub fn invalidate_cell(&self, root: &Path) -> usize {
        self.inputs_under_symlinks.retain(|link, _| !link.starts_with(root));
        self.raw_nodes.invalidate_where(|key, _| key.cell == root)
            + self.target_nodes.invalidate_where(|key, _| key.cell == root)
    }
}
