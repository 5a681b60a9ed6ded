//! Context-local variables with explicit snapshot and restore.
//!
//! A [`ContextVar`] is a named slot in the calling thread's *active context*,
//! an immutable copy-on-write map. The execution bridge captures the caller's
//! context at submission time ([`capture`]) and installs it around the
//! dispatched callable on the worker thread ([`ContextSnapshot::run`]), so
//! context state set by the submitter is visible to the callee even though it
//! runs on a different thread.
//!
//! Mutation is strictly local: `set` replaces the calling thread's active map
//! with an extended copy. A callee running under a snapshot therefore sees
//! the caller's values but can never mutate the caller's live context — only
//! its own installed copy, which is discarded when the callable returns.

use std::any::Any;
use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;

type ValueMap = HashMap<u64, Arc<dyn Any + Send + Sync>>;

thread_local! {
    static ACTIVE: RefCell<Arc<ValueMap>> = RefCell::new(Arc::new(HashMap::new()));
}

static NEXT_VAR_KEY: AtomicU64 = AtomicU64::new(1);

/// A context-local variable of type `T`.
///
/// Construct once (typically in a `LazyLock`) and share; each thread reads
/// and writes its own active context.
///
/// # Example
///
/// ```
/// use std::sync::LazyLock;
/// use crosslane::context::ContextVar;
///
/// static REQUEST_ID: LazyLock<ContextVar<u64>> =
///     LazyLock::new(|| ContextVar::new("request_id"));
///
/// REQUEST_ID.set(17);
/// assert_eq!(REQUEST_ID.get(), Some(17));
/// ```
#[derive(Debug)]
pub struct ContextVar<T> {
    key: u64,
    name: &'static str,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Clone + Send + Sync + 'static> ContextVar<T> {
    /// Creates a new variable. The name is used for diagnostics only; two
    /// variables with the same name are still distinct slots.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            key: NEXT_VAR_KEY.fetch_add(1, Ordering::Relaxed),
            name,
            _marker: std::marker::PhantomData,
        }
    }

    /// Returns the diagnostic name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Sets the variable in the calling thread's active context.
    pub fn set(&self, value: T) {
        ACTIVE.with(|active| {
            let mut map: ValueMap = (**active.borrow()).clone();
            map.insert(self.key, Arc::new(value));
            *active.borrow_mut() = Arc::new(map);
        });
    }

    /// Reads the variable from the calling thread's active context.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        ACTIVE.with(|active| {
            active
                .borrow()
                .get(&self.key)
                .and_then(|v| v.downcast_ref::<T>())
                .cloned()
        })
    }

    /// Reads the variable, falling back to `default` when unset.
    #[must_use]
    pub fn get_or(&self, default: T) -> T {
        self.get().unwrap_or(default)
    }

    /// Removes the variable from the calling thread's active context.
    pub fn clear(&self) {
        ACTIVE.with(|active| {
            if active.borrow().contains_key(&self.key) {
                let mut map: ValueMap = (**active.borrow()).clone();
                map.remove(&self.key);
                *active.borrow_mut() = Arc::new(map);
            }
        });
    }
}

/// An immutable snapshot of a thread's active context.
///
/// Cheap to clone and to capture: the underlying map is shared, never
/// mutated in place.
#[derive(Debug, Clone, Default)]
pub struct ContextSnapshot {
    values: Arc<ValueMap>,
}

/// Captures the calling thread's active context.
#[must_use]
pub fn capture() -> ContextSnapshot {
    ContextSnapshot {
        values: ACTIVE.with(|active| Arc::clone(&active.borrow())),
    }
}

impl ContextSnapshot {
    /// Runs `f` with this snapshot installed as the calling thread's active
    /// context, restoring the previous context afterwards — on unwind too.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let previous = ACTIVE.with(|active| {
            std::mem::replace(&mut *active.borrow_mut(), Arc::clone(&self.values))
        });
        let _restore = RestoreGuard { previous: Some(previous) };
        f()
    }

    /// Number of variables captured in this snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if the snapshot holds no variables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

struct RestoreGuard {
    previous: Option<Arc<ValueMap>>,
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            ACTIVE.with(|active| {
                *active.borrow_mut() = previous;
            });
        }
    }
}
