//! Bounded, per-cell pool of build file parsers.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxBuildHasher;

use super::{BuildFileParser, BuildFileParserFactory};
use crate::cell::Cell;
use crate::error::{ParseError, Result};
use crate::events::{EventSink, ParseEvent};

/// Hands out at most `max_per_cell` parsers per cell, creating them lazily
/// and reusing them until [`ParserPool::close`].
pub struct ParserPool {
    max_per_cell: usize,
    factory: Arc<dyn BuildFileParserFactory>,
    profiling: bool,
    borrow_timeout: Option<Duration>,
    events: Arc<dyn EventSink>,
    cells: DashMap<PathBuf, Arc<CellParsers>, FxBuildHasher>,
    closed: AtomicBool,
}

struct CellParsers {
    root: PathBuf,
    state: Mutex<SlotState>,
    freed: Condvar,
}

#[derive(Default)]
struct SlotState {
    idle: Vec<Box<dyn BuildFileParser>>,
    /// Live parsers, idle and leased.
    created: usize,
    closed: bool,
}

impl CellParsers {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            state: Mutex::new(SlotState::default()),
            freed: Condvar::new(),
        }
    }
}

impl ParserPool {
    pub fn new(
        max_per_cell: usize,
        factory: Arc<dyn BuildFileParserFactory>,
        profiling: bool,
        borrow_timeout: Option<Duration>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            max_per_cell: max_per_cell.max(1),
            factory,
            profiling,
            borrow_timeout,
            events,
            cells: DashMap::with_hasher(FxBuildHasher),
            closed: AtomicBool::new(false),
        }
    }

    pub fn max_per_cell(&self) -> usize {
        self.max_per_cell
    }

    /// Borrow a parser for `cell`, waiting while all of its parsers are leased.
    pub fn borrow(&self, cell: &Cell) -> Result<ParserLease<'_>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ParseError::SessionClosed);
        }
        let slots = self.slots_for(cell.root());
        self.borrow_from(cell, slots)
    }

    fn borrow_from(&self, cell: &Cell, slots: Arc<CellParsers>) -> Result<ParserLease<'_>> {
        let start = Instant::now();
        let deadline = self.borrow_timeout.map(|timeout| start + timeout);

        let mut state = slots.state.lock();
        loop {
            // A cell first seen during `close` is missing from its snapshot.
            if state.closed || self.closed.load(Ordering::Acquire) {
                return Err(ParseError::SessionClosed);
            }
            if let Some(parser) = state.idle.pop() {
                drop(state);
                self.log_wait(cell, start);
                return Ok(ParserLease::new(self, slots, parser));
            }
            if state.created < self.max_per_cell {
                state.created += 1;
                drop(state);
                return self.create(cell, slots);
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(ParseError::WorkerUnavailable {
                            cell_root: cell.root().to_path_buf(),
                            waited: start.elapsed(),
                        });
                    }
                    slots.freed.wait_until(&mut state, deadline);
                }
                None => slots.freed.wait(&mut state),
            }
        }
    }

    /// Return a parser to the pool. Equivalent to dropping the lease.
    pub fn release(&self, lease: ParserLease<'_>) {
        drop(lease);
    }

    /// Close every parser created so far.
    ///
    /// Parsers still leased are closed when their lease is released. All
    /// failures are collected into a single `Close` error.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let all: Vec<Arc<CellParsers>> = self.cells.iter().map(|e| Arc::clone(e.value())).collect();
        let mut errors = Vec::new();
        for slots in all {
            let (idle, outstanding) = {
                let mut state = slots.state.lock();
                state.closed = true;
                let idle = std::mem::take(&mut state.idle);
                state.created -= idle.len();
                (idle, state.created)
            };
            slots.freed.notify_all();
            for parser in idle {
                if let Err(err) = self.close_parser(&slots.root, parser) {
                    errors.push(err);
                }
            }
            if outstanding > 0 {
                tracing::warn!(
                    cell = %slots.root.display(),
                    outstanding,
                    "parsers still leased at close; they will be closed on release"
                );
            }
        }
        ParseError::from_close_errors(errors)
    }

    /// Parsers currently alive for the cell at `root`.
    pub fn created_count(&self, root: &Path) -> usize {
        self.cells
            .get(root)
            .map(|slots| slots.state.lock().created)
            .unwrap_or(0)
    }

    /// Parsers waiting to be borrowed for the cell at `root`.
    pub fn idle_count(&self, root: &Path) -> usize {
        self.cells
            .get(root)
            .map(|slots| slots.state.lock().idle.len())
            .unwrap_or(0)
    }

    fn slots_for(&self, root: &Path) -> Arc<CellParsers> {
        if let Some(slots) = self.cells.get(root) {
            return Arc::clone(slots.value());
        }
        Arc::clone(
            self.cells
                .entry(root.to_path_buf())
                .or_insert_with(|| Arc::new(CellParsers::new(root.to_path_buf())))
                .value(),
        )
    }

    fn create(&self, cell: &Cell, slots: Arc<CellParsers>) -> Result<ParserLease<'_>> {
        match self.factory.create(cell, self.profiling) {
            Ok(parser) => {
                tracing::debug!(cell = %cell.root().display(), "created build file parser");
                self.events.post(&ParseEvent::ParserCreated {
                    cell_root: cell.root().to_path_buf(),
                });
                Ok(ParserLease::new(self, slots, parser))
            }
            Err(err) => {
                slots.state.lock().created -= 1;
                slots.freed.notify_one();
                Err(err)
            }
        }
    }

    fn close_parser(&self, root: &Path, mut parser: Box<dyn BuildFileParser>) -> Result<()> {
        let result = parser.close();
        self.events.post(&ParseEvent::ParserClosed {
            cell_root: root.to_path_buf(),
        });
        result
    }

    fn log_wait(&self, cell: &Cell, start: Instant) {
        if self.profiling {
            tracing::debug!(
                cell = %cell.root().display(),
                waited = ?start.elapsed(),
                "borrowed build file parser"
            );
        }
    }

    fn give_back(&self, slots: &CellParsers, parser: Box<dyn BuildFileParser>) {
        let mut state = slots.state.lock();
        if state.closed {
            state.created -= 1;
            drop(state);
            if let Err(err) = self.close_parser(&slots.root, parser) {
                tracing::warn!(error = %err, "failed to close parser released after pool close");
            }
            return;
        }
        state.idle.push(parser);
        drop(state);
        slots.freed.notify_one();
    }

    fn forget(&self, slots: &CellParsers, parser: Box<dyn BuildFileParser>) -> Result<()> {
        slots.state.lock().created -= 1;
        slots.freed.notify_one();
        self.close_parser(&slots.root, parser)
    }
}

/// Exclusive use of one parser. Returned to the pool on drop.
pub struct ParserLease<'a> {
    pool: &'a ParserPool,
    slots: Arc<CellParsers>,
    parser: Option<Box<dyn BuildFileParser>>,
}

impl<'a> ParserLease<'a> {
    fn new(pool: &'a ParserPool, slots: Arc<CellParsers>, parser: Box<dyn BuildFileParser>) -> Self {
        Self {
            pool,
            slots,
            parser: Some(parser),
        }
    }

    /// Close the parser instead of returning it, freeing its slot.
    ///
    /// Used when the worker failed and cannot be trusted with another file.
    pub fn discard(mut self) -> Result<()> {
        match self.parser.take() {
            Some(parser) => self.pool.forget(&self.slots, parser),
            None => Ok(()),
        }
    }
}

impl Deref for ParserLease<'_> {
    type Target = dyn BuildFileParser;

    fn deref(&self) -> &Self::Target {
        // Only `discard` and `drop` take the parser, and both consume the lease.
        self.parser.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for ParserLease<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.parser.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for ParserLease<'_> {
    fn drop(&mut self) {
        if let Some(parser) = self.parser.take() {
            self.pool.give_back(&self.slots, parser);
        }
    }
}
