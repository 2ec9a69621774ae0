//! The two parse pipelines: build file → raw nodes → target nodes.
//!
//! ```text
//! TargetNodeParsePipeline   ← per-target memo, marshalling, symlink checks
//!     │
//!     ▼
//! RawNodeParsePipeline      ← per-build-file memo, parser pool
//!     │
//!     ▼
//! ParserPool                ← bounded external parsers
//! ```
//!
//! Both pipelines memoize through [`OnceMap`], giving at-most-once
//! computation per key for the lifetime of one build, and sit on top of a
//! long-lived [`NodeCache`](crate::daemon::NodeCache) shared across builds.

mod cache;
#[cfg(test)]
pub(crate) mod fixtures;
mod job;
mod raw;
mod target;

use std::path::Path;
use std::sync::Arc;

use crate::base::BuildTarget;
use crate::cell::Cell;
use crate::error::Result;

pub use cache::OnceMap;
pub use job::{InFlight, InFlightGuard, Job, JobScheduler};
pub use raw::RawNodeParsePipeline;
pub use target::TargetNodeParsePipeline;

/// Common surface of the raw and typed pipelines.
pub trait ParsePipeline: Send + Sync + 'static {
    type Node: Clone + Send + Sync + 'static;

    /// The node for `target`, parsing its build file if needed.
    fn get_node(&self, cell: &Arc<Cell>, target: &BuildTarget) -> Result<Self::Node>;

    /// Like [`get_node`](Self::get_node) without blocking the caller.
    fn get_node_job(self: &Arc<Self>, cell: &Arc<Cell>, target: &BuildTarget) -> Job<Self::Node>;

    /// Every node declared in `build_file`, in declaration order.
    fn get_all_nodes(&self, cell: &Arc<Cell>, build_file: &Path) -> Result<Vec<Self::Node>>;

    /// Like [`get_all_nodes`](Self::get_all_nodes) without blocking the caller.
    fn get_all_nodes_job(
        self: &Arc<Self>,
        cell: &Arc<Cell>,
        build_file: &Path,
    ) -> Job<Vec<Self::Node>>;

    /// Stop accepting work and drop per-build state.
    fn close(&self) -> Result<()>;
}
