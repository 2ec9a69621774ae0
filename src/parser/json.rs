//! Reference parser reading pre-evaluated build files.
//!
//! A build file is a JSON array of declaration objects:
//!
//! ```json
//! [
//!   { "name": "lib", "buck.type": "js_library", "srcs": ["index.js"] }
//! ]
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::Value;

use super::{BuildFileParser, BuildFileParserFactory, Declaration, ParsedBuildFile};
use crate::cell::Cell;
use crate::error::{ParseError, Result};

pub struct JsonBuildFileParser {
    cell_root: PathBuf,
    profiling: bool,
    files_parsed: usize,
    time_parsing: Duration,
}

impl JsonBuildFileParser {
    pub fn new(cell: &Cell, profiling: bool) -> Self {
        Self {
            cell_root: cell.root().to_path_buf(),
            profiling,
            files_parsed: 0,
            time_parsing: Duration::ZERO,
        }
    }

    fn decode(build_file: &Path, bytes: &[u8]) -> Result<Vec<Declaration>> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| {
            ParseError::parse_failure(build_file, Some(e.line()), e.to_string())
        })?;
        let Value::Array(items) = value else {
            return Err(ParseError::parse_failure(
                build_file,
                None,
                "expected a list of declarations",
            ));
        };
        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Object(map) => Ok(map.into_iter().collect()),
                other => Err(ParseError::parse_failure(
                    build_file,
                    None,
                    format!("declaration #{} is {}, expected an object", index, kind(&other)),
                )),
            })
            .collect()
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

impl BuildFileParser for JsonBuildFileParser {
    fn parse_build_file(&mut self, _cell: &Cell, build_file: &Path) -> Result<ParsedBuildFile> {
        let start = Instant::now();
        let bytes = std::fs::read(build_file).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                ParseError::parse_failure(build_file, None, "build file does not exist")
            }
            _ => ParseError::io(build_file, e),
        })?;
        let declarations = Self::decode(build_file, &bytes)?;
        self.files_parsed += 1;
        self.time_parsing += start.elapsed();
        Ok(ParsedBuildFile {
            declarations,
            processed_bytes: bytes.len() as u64,
        })
    }

    fn close(&mut self) -> Result<()> {
        if self.profiling {
            tracing::info!(
                cell = %self.cell_root.display(),
                files = self.files_parsed,
                elapsed = ?self.time_parsing,
                "build file parser profile"
            );
        }
        Ok(())
    }
}

/// Factory for [`JsonBuildFileParser`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonParserFactory;

impl BuildFileParserFactory for JsonParserFactory {
    fn create(&self, cell: &Cell, profiling: bool) -> Result<Box<dyn BuildFileParser>> {
        Ok(Box::new(JsonBuildFileParser::new(cell, profiling)))
    }
}
