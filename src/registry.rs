//! Thread-local registry: named per-thread slots behind an explicit map.
//!
//! A [`LocalStore`] is a registry of values keyed by `(thread, name)`. It is
//! the leaf primitive the rest of the crate builds on — the thread-bound
//! event-loop cache is a `LocalStore<EventLoop>` — and is exposed for callers
//! that need get-or-create semantics over per-thread state.
//!
//! The map is explicit rather than hidden inside `thread_local!` storage so
//! that lifecycle is observable and testable: a value lives until its thread's
//! entry is [`remove`](LocalStore::remove)d, and a different thread never sees
//! it.

use std::thread::{self, ThreadId};

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// A registry of named values, one slot per `(thread, name)` pair.
///
/// Values must be `Clone`; callers that want shared single instances store an
/// `Arc<T>`. All operations act on the calling thread's slots only.
///
/// # Example
///
/// ```
/// use crosslane::registry::LocalStore;
///
/// let store: LocalStore<u32> = LocalStore::new();
/// let v = store.get_or_create("counter", || 7);
/// assert_eq!(v, 7);
/// assert_eq!(store.get("counter").unwrap(), 7);
/// store.remove("counter");
/// assert!(store.get("counter").is_err());
/// ```
#[derive(Debug)]
pub struct LocalStore<T> {
    slots: Mutex<HashMap<(ThreadId, String), T>>,
}

impl<T> Default for LocalStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LocalStore<T> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Removes the calling thread's slot for `name`. No-op if absent.
    pub fn remove(&self, name: &str) {
        let key = (thread::current().id(), name.to_string());
        self.slots.lock().remove(&key);
    }

    /// Returns the number of live slots across all threads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// True if no slot is populated on any thread.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

impl<T: Clone> LocalStore<T> {
    /// Returns the calling thread's value for `name`, creating it with
    /// `factory` on first use.
    ///
    /// The factory is invoked at most once per `(thread, name)`: only the
    /// calling thread can populate its own slot. It runs with the internal
    /// map lock held, so it must not touch this store.
    pub fn get_or_create(&self, name: &str, factory: impl FnOnce() -> T) -> T {
        let key = (thread::current().id(), name.to_string());
        let mut slots = self.slots.lock();
        slots.entry(key).or_insert_with(factory).clone()
    }

    /// Returns the calling thread's value for `name`.
    ///
    /// # Errors
    ///
    /// [`Error::SlotNotInitialized`] if this thread never stored a value
    /// under `name` (or removed it).
    pub fn get(&self, name: &str) -> Result<T> {
        let key = (thread::current().id(), name.to_string());
        self.slots
            .lock()
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::SlotNotInitialized(name.to_string()))
    }

    /// Stores `value` in the calling thread's slot, replacing any previous
    /// value.
    pub fn set(&self, name: &str, value: T) {
        let key = (thread::current().id(), name.to_string());
        self.slots.lock().insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn get_or_create_runs_factory_once() {
        let store: LocalStore<u32> = LocalStore::new();
        let calls = AtomicUsize::new(0);
        let first = store.get_or_create("value", || {
            calls.fetch_add(1, Ordering::SeqCst);
            11
        });
        let second = store.get_or_create("value", || {
            calls.fetch_add(1, Ordering::SeqCst);
            99
        });
        assert_eq!(first, 11);
        assert_eq!(second, 11);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn get_unset_slot_is_error() {
        let store: LocalStore<u32> = LocalStore::new();
        let err = store.get("nonexist").unwrap_err();
        assert_eq!(err, Error::SlotNotInitialized("nonexist".to_string()));
    }

    #[test]
    fn remove_is_noop_when_absent() {
        let store: LocalStore<u32> = LocalStore::new();
        store.remove("value");
        store.set("value", 3);
        store.remove("value");
        assert!(store.get("value").is_err());
    }

    #[test]
    fn slots_are_per_thread() {
        let store: Arc<LocalStore<u32>> = Arc::new(LocalStore::new());
        store.set("value", 1);

        let remote = Arc::clone(&store);
        let seen = std::thread::spawn(move || {
            let miss = remote.get("value").is_err();
            remote.set("value", 2);
            (miss, remote.get("value").unwrap())
        })
        .join()
        .unwrap();

        assert_eq!(seen, (true, 2));
        // The other thread's write never shadows ours.
        assert_eq!(store.get("value").unwrap(), 1);
        assert_eq!(store.len(), 2);
    }
}
