//! In-memory parser shared by the pipeline unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};

use crate::cell::Cell;
use crate::error::{ParseError, Result};
use crate::events::NoopEventSink;
use crate::parser::{BuildFileParser, BuildFileParserFactory, Declaration, ParsedBuildFile, ParserPool};

#[derive(Clone)]
pub enum FakeContent {
    Declarations(Vec<Declaration>),
    Malformed(String),
    WorkerCrash,
}

#[derive(Default)]
pub struct FakeFiles {
    files: Mutex<FxHashMap<PathBuf, FakeContent>>,
    parses: Mutex<FxHashMap<PathBuf, usize>>,
    created: AtomicUsize,
    delay: Mutex<Duration>,
}

impl FakeFiles {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, path: impl Into<PathBuf>, content: FakeContent) {
        self.files.lock().insert(path.into(), content);
    }

    pub fn declare(&self, path: impl Into<PathBuf>, declarations: Vec<Value>) {
        let declarations = declarations.into_iter().map(to_declaration).collect();
        self.set(path, FakeContent::Declarations(declarations));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn parse_count(&self, path: &str) -> usize {
        self.parses.lock().get(Path::new(path)).copied().unwrap_or(0)
    }

    pub fn total_parses(&self) -> usize {
        self.parses.lock().values().sum()
    }

    pub fn parsers_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn pool(self: &Arc<Self>, max_per_cell: usize) -> Arc<ParserPool> {
        Arc::new(ParserPool::new(
            max_per_cell,
            Arc::new(FakeParserFactory(Arc::clone(self))),
            false,
            None,
            Arc::new(NoopEventSink),
        ))
    }
}

pub fn to_declaration(value: Value) -> Declaration {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        other => panic!("declaration must be an object, got {other}"),
    }
}

pub fn decl(name: &str, rule_type: &str) -> Value {
    json!({ "name": name, "buck.type": rule_type })
}

pub struct FakeParserFactory(pub Arc<FakeFiles>);

impl BuildFileParserFactory for FakeParserFactory {
    fn create(&self, _cell: &Cell, _profiling: bool) -> Result<Box<dyn BuildFileParser>> {
        self.0.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeParser(Arc::clone(&self.0))))
    }
}

struct FakeParser(Arc<FakeFiles>);

impl BuildFileParser for FakeParser {
    fn parse_build_file(&mut self, _cell: &Cell, build_file: &Path) -> Result<ParsedBuildFile> {
        *self
            .0
            .parses
            .lock()
            .entry(build_file.to_path_buf())
            .or_default() += 1;
        let delay = *self.0.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let content = self.0.files.lock().get(build_file).cloned();
        match content {
            Some(FakeContent::Declarations(declarations)) => {
                let processed_bytes: u64 = declarations
                    .iter()
                    .flat_map(|declaration| declaration.iter())
                    .map(|(key, value)| (key.len() + value.to_string().len()) as u64)
                    .sum();
                Ok(ParsedBuildFile {
                    declarations,
                    processed_bytes,
                })
            }
            Some(FakeContent::Malformed(message)) => {
                Err(ParseError::parse_failure(build_file, Some(1), message))
            }
            Some(FakeContent::WorkerCrash) => Err(ParseError::worker_failure(
                build_file,
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "interpreter exited"),
            )),
            None => Err(ParseError::parse_failure(
                build_file,
                None,
                "build file does not exist",
            )),
        }
    }
}

/// Keeps every posted event for later assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<crate::events::ParseEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<crate::events::ParseEvent> {
        self.events.lock().clone()
    }
}

impl crate::events::EventSink for RecordingSink {
    fn post(&self, event: &crate::events::ParseEvent) {
        self.events.lock().push(event.clone());
    }
}

pub fn scheduler(threads: usize) -> crate::pipeline::JobScheduler {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .expect("test executor");
    crate::pipeline::JobScheduler::new(
        Arc::new(pool),
        Arc::new(crate::pipeline::InFlight::new()),
    )
}
