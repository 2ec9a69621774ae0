//! External build file parsers and the pool that bounds them.
//!
//! A [`BuildFileParser`] always returns every declaration of a file at once;
//! parsers are expensive (typically an interpreter process), so the
//! [`ParserPool`] hands them out per cell up to a fixed maximum and reuses
//! them for the rest of the build.

mod json;
mod pool;

use std::path::Path;

use indexmap::IndexMap;
use serde_json::Value;

use crate::cell::Cell;
use crate::error::Result;

pub use json::{JsonBuildFileParser, JsonParserFactory};
pub use pool::{ParserLease, ParserPool};

/// One declaration as produced by the interpreter.
pub type Declaration = IndexMap<String, Value>;

/// Every declaration of one build file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedBuildFile {
    pub declarations: Vec<Declaration>,
    /// Size of the payload the parser processed.
    pub processed_bytes: u64,
}

/// Contract of the external build file interpreter.
pub trait BuildFileParser: Send {
    /// Parse `build_file` of `cell`, returning all of its declarations.
    ///
    /// Malformed content fails with `ParseFailure`; failures of the worker
    /// itself fail with `Io`.
    fn parse_build_file(&mut self, cell: &Cell, build_file: &Path) -> Result<ParsedBuildFile>;

    /// Release the worker. Called exactly once per created parser.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Creates parsers bound to one cell's configuration.
pub trait BuildFileParserFactory: Send + Sync {
    fn create(&self, cell: &Cell, profiling: bool) -> Result<Box<dyn BuildFileParser>>;
}

impl<F> BuildFileParserFactory for F
where
    F: Fn(&Cell, bool) -> Result<Box<dyn BuildFileParser>> + Send + Sync,
{
    fn create(&self, cell: &Cell, profiling: bool) -> Result<Box<dyn BuildFileParser>> {
        self(cell, profiling)
    }
}
