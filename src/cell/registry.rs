use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rustc_hash::FxBuildHasher;

use super::Cell;
use crate::base::BuildTarget;
use crate::error::{ParseError, Result};

/// Told about every cell the first time it is registered.
pub trait CellRegistrationListener: Send + Sync {
    fn cell_registered(&self, root: &Path, cell: &Arc<Cell>);
}

/// Cells known to one build, keyed by root. Only ever grows.
pub struct CellRegistry {
    cells: DashMap<PathBuf, Arc<Cell>, FxBuildHasher>,
    listener: Arc<dyn CellRegistrationListener>,
}

impl CellRegistry {
    pub fn new(listener: Arc<dyn CellRegistrationListener>) -> Self {
        Self {
            cells: DashMap::with_hasher(FxBuildHasher),
            listener,
        }
    }

    /// Register `cell` unless its root is already known.
    ///
    /// Returns the registered cell, which is the earlier one on a repeat.
    pub fn register(&self, cell: Arc<Cell>) -> Arc<Cell> {
        let root = cell.root().to_path_buf();
        let registered = match self.cells.entry(root) {
            Entry::Occupied(entry) => return Arc::clone(entry.get()),
            Entry::Vacant(entry) => Arc::clone(entry.insert(cell).value()),
        };
        tracing::debug!(root = %registered.root().display(), "registered cell");
        self.listener
            .cell_registered(registered.root(), &registered);
        registered
    }

    /// The cell owning `target`, discovering it through known cells if needed.
    pub fn resolve(&self, target: &BuildTarget) -> Result<Arc<Cell>> {
        if let Some(cell) = self.get(target.cell_path()) {
            return Ok(cell);
        }

        // Snapshot first: registering while iterating would deadlock the shard.
        let known: Vec<Arc<Cell>> = self.cells.iter().map(|e| Arc::clone(e.value())).collect();
        for possible_owner in known {
            if let Some(found) = possible_owner.cell_if_known(target) {
                tracing::debug!(
                    build_target = %target,
                    via = %possible_owner.root().display(),
                    "discovered cell"
                );
                return Ok(self.register(found));
            }
        }

        Err(ParseError::CellNotFound {
            target: target.to_string(),
            cell_path: target.cell_path().to_path_buf(),
        })
    }

    pub fn get(&self, root: &Path) -> Option<Arc<Cell>> {
        self.cells.get(root).map(|e| Arc::clone(e.value()))
    }

    pub fn cells(&self) -> Vec<Arc<Cell>> {
        self.cells.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}
