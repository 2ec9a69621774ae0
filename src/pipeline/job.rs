//! Future-like handles for work scheduled on the shared executor.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rayon::ThreadPool;

use crate::error::{ParseError, Result};

/// Handle to a result that is computed elsewhere.
///
/// Clones share the same result. `wait` must not be called from a thread of
/// the executor the job runs on when that executor may be saturated.
pub struct Job<T> {
    inner: Arc<JobInner<T>>,
}

struct JobInner<T> {
    result: Mutex<Option<Result<T>>>,
    done: Condvar,
}

impl<T> Clone for Job<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> Job<T> {
    fn pending() -> Self {
        Self {
            inner: Arc::new(JobInner {
                result: Mutex::new(None),
                done: Condvar::new(),
            }),
        }
    }

    /// A job that is already finished.
    pub fn completed(result: Result<T>) -> Self {
        let job = Self::pending();
        job.complete(result);
        job
    }

    fn complete(&self, result: Result<T>) {
        *self.inner.result.lock() = Some(result);
        self.inner.done.notify_all();
    }

    /// Block until the result is available.
    pub fn wait(&self) -> Result<T> {
        let mut result = self.inner.result.lock();
        loop {
            if let Some(result) = result.as_ref() {
                return result.clone();
            }
            self.inner.done.wait(&mut result);
        }
    }

    /// Block for at most `timeout`; `None` if still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        let deadline = Instant::now() + timeout;
        let mut result = self.inner.result.lock();
        while result.is_none() {
            if self.inner.done.wait_until(&mut result, deadline).timed_out() {
                break;
            }
        }
        result.clone()
    }

    /// The result if it is already available.
    pub fn try_get(&self) -> Option<Result<T>> {
        self.inner.result.lock().clone()
    }

    pub fn is_done(&self) -> bool {
        self.inner.result.lock().is_some()
    }
}

/// Counts operations that are running so close can wait for them.
#[derive(Default)]
pub struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        *self.count.lock() += 1;
        InFlightGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Wait until nothing is in flight or `timeout` passes; true when idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

pub struct InFlightGuard {
    tracker: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.tracker.count.lock();
        *count -= 1;
        if *count == 0 {
            self.tracker.idle.notify_all();
        }
    }
}

/// Spawns jobs on the shared executor and tracks them as in-flight work.
#[derive(Clone)]
pub struct JobScheduler {
    executor: Arc<ThreadPool>,
    in_flight: Arc<InFlight>,
}

impl JobScheduler {
    pub fn new(executor: Arc<ThreadPool>, in_flight: Arc<InFlight>) -> Self {
        Self {
            executor,
            in_flight,
        }
    }

    pub fn executor(&self) -> &Arc<ThreadPool> {
        &self.executor
    }

    pub fn in_flight(&self) -> &Arc<InFlight> {
        &self.in_flight
    }

    /// Run `work` on the executor, returning immediately.
    pub fn spawn<T, F>(&self, what: &str, work: F) -> Job<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let job = Job::pending();
        let handle = job.clone();
        let guard = self.in_flight.enter();
        let what = what.to_string();
        self.executor.spawn(move || {
            let _guard = guard;
            let result = catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|_| {
                tracing::error!(job = %what, "parse job panicked");
                Err(ParseError::Abandoned { what })
            });
            handle.complete(result);
        });
        job
    }
}
