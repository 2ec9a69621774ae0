//! Foundation types for parse sessions.
//!
//! This module provides the value types every other layer passes around:
//! - [`BuildTarget`], [`Flavor`] - Fully-qualified target identities
//! - [`RawNode`] - Untyped attribute map of one build-file declaration
//! - [`TargetNode`] - Validated, dependency-aware node
//! - [`ParseKey`] - Memoization key of the parse pipelines
//! - Attribute name constants
//!
//! This module has NO dependencies on other cellparse modules except `error`.

pub mod constants;
mod node;
mod target;

pub use node::{ParseKey, RawNode, RawNodeSet, TargetNode};
pub use target::{BuildTarget, Flavor};
