//! # cellparse-base
//!
//! Per-build parsing of build files into target nodes across multiple cells.
//!
//! ## Module Structure (dependency order)
//!
//! ```text
//! session   → PerBuildState: composition root, bounded close
//!   ↓
//! pipeline  → raw and typed parse pipelines, at-most-once memo, jobs
//!   ↓
//! marshal   → raw node → target node (rule types, flavors, deps)
//! symlink   → inputs reached through symbolic links
//! daemon    → node caches shared across builds
//!   ↓
//! parser    → external parser contract, pooled per cell
//!   ↓
//! cell      → cells, alias resolution, registry
//!   ↓
//! base      → BuildTarget, RawNode, TargetNode
//! ```

// ============================================================================
// MODULES (dependency order: base → cell → parser → daemon/symlink/marshal → pipeline → session)
// ============================================================================

/// Foundation types: targets, flavors, raw and target nodes
pub mod base;

/// Cells: roots, alias resolution, per-build registry
pub mod cell;

/// Parser configuration
pub mod config;

/// Long-lived node caches
pub mod daemon;

/// Error types
pub mod error;

/// Session lifecycle events
pub mod events;

/// Raw node → target node conversion
pub mod marshal;

/// External build file parsers and their pool
pub mod parser;

/// Raw and typed parse pipelines
pub mod pipeline;

/// Per-build session
pub mod session;

/// Symlinked input tracking
pub mod symlink;

// Re-export foundation types
pub use base::{BuildTarget, Flavor, ParseKey, RawNode, RawNodeSet, TargetNode};
pub use cell::{Cell, CellPathResolver, CellRegistry};
pub use config::{ParserConfig, SpeculativeParsing, SymlinkPolicy};
pub use error::{ParseError, Result, TargetDefinitionError};
pub use pipeline::{Job, ParsePipeline};
pub use session::{PerBuildState, PerBuildStateBuilder};
pub use symlink::SymlinkRecord;
