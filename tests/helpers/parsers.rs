//! A scripted in-memory parser that counts what the session asks of it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cellparse::parser::{BuildFileParser, BuildFileParserFactory, Declaration, ParsedBuildFile};
use cellparse::{Cell, ParseError, Result};
use parking_lot::Mutex;
use serde_json::Value;

#[derive(Default)]
pub struct ScriptedParsers {
    files: Mutex<HashMap<PathBuf, Vec<Declaration>>>,
    malformed: Mutex<HashMap<PathBuf, String>>,
    parses: Mutex<HashMap<PathBuf, usize>>,
    delay: Mutex<Duration>,
    created: AtomicUsize,
    closed: AtomicUsize,
    /// The n-th parser to be closed (1-based) fails its close.
    fail_close_of: Mutex<Option<usize>>,
}

impl ScriptedParsers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn factory(self: &Arc<Self>) -> Arc<dyn BuildFileParserFactory> {
        let scripted = Arc::clone(self);
        Arc::new(move |_cell: &Cell, _profiling: bool| -> Result<Box<dyn BuildFileParser>> {
            let id = scripted.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Box::new(ScriptedParser {
                id,
                scripted: Arc::clone(&scripted),
            }))
        })
    }

    /// Declare the contents of a build file as JSON objects.
    pub fn file(&self, path: &str, declarations: Vec<Value>) {
        let declarations = declarations
            .into_iter()
            .map(|value| match value {
                Value::Object(map) => map.into_iter().collect(),
                other => panic!("declaration must be an object: {other}"),
            })
            .collect();
        self.malformed.lock().remove(Path::new(path));
        self.files.lock().insert(PathBuf::from(path), declarations);
    }

    pub fn malformed(&self, path: &str, message: &str) {
        self.files.lock().remove(Path::new(path));
        self.malformed
            .lock()
            .insert(PathBuf::from(path), message.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn fail_close_of(&self, nth: usize) {
        *self.fail_close_of.lock() = Some(nth);
    }

    pub fn parses(&self, path: &str) -> usize {
        self.parses.lock().get(Path::new(path)).copied().unwrap_or(0)
    }

    pub fn total_parses(&self) -> usize {
        self.parses.lock().values().sum()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ScriptedParser {
    id: usize,
    scripted: Arc<ScriptedParsers>,
}

impl BuildFileParser for ScriptedParser {
    fn parse_build_file(&mut self, _cell: &Cell, build_file: &Path) -> Result<ParsedBuildFile> {
        *self
            .scripted
            .parses
            .lock()
            .entry(build_file.to_path_buf())
            .or_default() += 1;
        let delay = *self.scripted.delay.lock();
        std::thread::sleep(delay);

        if let Some(message) = self.scripted.malformed.lock().get(build_file) {
            return Err(ParseError::parse_failure(build_file, Some(1), message.clone()));
        }
        let declarations = self
            .scripted
            .files
            .lock()
            .get(build_file)
            .cloned()
            .ok_or_else(|| {
                ParseError::parse_failure(build_file, None, "build file does not exist")
            })?;
        Ok(ParsedBuildFile {
            processed_bytes: 64 * declarations.len() as u64,
            declarations,
        })
    }

    fn close(&mut self) -> Result<()> {
        let nth = self.scripted.closed.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.scripted.fail_close_of.lock() == Some(nth) {
            return Err(ParseError::io(
                format!("parser-{}", self.id),
                std::io::Error::other("worker did not exit"),
            ));
        }
        Ok(())
    }
}
