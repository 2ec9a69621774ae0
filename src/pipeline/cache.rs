//! At-most-once memoization shared by both pipelines.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxBuildHasher;

use crate::error::{ParseError, Result};

/// Map from key to a value computed at most once per successful attempt.
///
/// The first caller for a key runs the computation with no map lock held;
/// every concurrent caller for the same key blocks on that slot and receives
/// the same published result. A failed attempt is delivered to its waiters
/// and then forgotten, so the next request computes again.
pub struct OnceMap<K, V> {
    slots: DashMap<K, Arc<Slot<V>>, FxBuildHasher>,
}

struct Slot<V> {
    state: Mutex<Option<Result<V>>>,
    ready: Condvar,
}

impl<V: Clone> Slot<V> {
    fn pending() -> Self {
        Self {
            state: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn publish(&self, result: Result<V>) {
        *self.state.lock() = Some(result);
        self.ready.notify_all();
    }

    fn wait(&self) -> Result<V> {
        let mut state = self.state.lock();
        loop {
            if let Some(result) = state.as_ref() {
                return result.clone();
            }
            self.ready.wait(&mut state);
        }
    }

    fn peek(&self) -> Option<Result<V>> {
        self.state.lock().clone()
    }
}

impl<K, V> OnceMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            slots: DashMap::with_hasher(FxBuildHasher),
        }
    }

    /// Value for `key`, computing it with `compute` if nobody has yet.
    pub fn get_or_compute<F>(&self, key: &K, compute: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        let slot = match self.slots.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let slot = Arc::clone(entry.get());
                drop(entry);
                return slot.wait();
            }
            Entry::Vacant(entry) => {
                let slot = Arc::new(Slot::pending());
                entry.insert(Arc::clone(&slot));
                slot
            }
        };

        let mut guard = PendingSlot {
            map: self,
            key,
            slot: &slot,
            done: false,
        };
        let result = compute();
        guard.finish(result.clone());
        result
    }

    /// Completed value for `key`, without waiting or computing.
    pub fn get_if_present(&self, key: &K) -> Option<V> {
        let slot = self.slots.get(key).map(|s| Arc::clone(s.value()))?;
        match slot.peek() {
            Some(Ok(value)) => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get_if_present(key).is_some()
    }

    /// Number of computations still running.
    pub fn pending(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| entry.value().state.lock().is_none())
            .count()
    }

    /// Number of completed values.
    pub fn len(&self) -> usize {
        self.slots.len() - self.pending()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop completed values. Running computations keep their slots.
    pub fn clear(&self) {
        self.slots
            .retain(|_, slot| slot.state.lock().is_none());
    }

    fn forget(&self, key: &K, slot: &Arc<Slot<V>>) {
        self.slots
            .remove_if(key, |_, current| Arc::ptr_eq(current, slot));
    }
}

impl<K, V> Default for OnceMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Publishes `Abandoned` if the computation unwinds before finishing.
struct PendingSlot<'a, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    map: &'a OnceMap<K, V>,
    key: &'a K,
    slot: &'a Arc<Slot<V>>,
    done: bool,
}

impl<K, V> PendingSlot<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn finish(&mut self, result: Result<V>) {
        self.done = true;
        if result.is_err() {
            self.map.forget(self.key, self.slot);
        }
        self.slot.publish(result);
    }
}

impl<K, V> Drop for PendingSlot<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        if !self.done {
            self.map.forget(self.key, self.slot);
            self.slot.publish(Err(ParseError::Abandoned {
                what: "memoized parse computation".to_string(),
            }));
        }
    }
}
