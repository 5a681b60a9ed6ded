//! A hand-rolled single-threaded event loop.
//!
//! [`EventLoop`] is the crate's "scheduler loop": a cooperative executor
//! driven by whichever thread calls [`block_on`](EventLoop::block_on).
//! Tasks may be spawned onto it from any thread; the driving thread is
//! unparked when work arrives. One loop is driven by at most one thread at
//! a time, and a thread drives at most one loop at a time.
//!
//! Every task (including the `block_on` main future) runs under a
//! [`TaskId`], queryable inside task code via [`current_task_id`]. Outside
//! any loop, [`current_task_id`] falls back to a stable per-thread ambient
//! identity so task-keyed primitives (the hybrid lock's async domain) behave
//! as "one logical task per foreign thread".

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, Thread};

use futures_lite::FutureExt;

use crate::error::Error;
use crate::promise::{self, TaskFuture};
use crate::tracing_compat::trace;

/// Identity of a loop task (or of a thread's ambient pseudo-task).
///
/// Ids are process-unique and monotonically assigned; they are never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Debug for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

thread_local! {
    static CURRENT_TASK: std::cell::Cell<Option<TaskId>> = const { std::cell::Cell::new(None) };
    static AMBIENT_TASK: std::cell::Cell<Option<TaskId>> = const { std::cell::Cell::new(None) };
    static CURRENT_LOOP: std::cell::RefCell<Option<EventLoop>> = const { std::cell::RefCell::new(None) };
}

/// Returns the identity of the running loop task, or this thread's stable
/// ambient identity when called outside a loop.
#[must_use]
pub fn current_task_id() -> TaskId {
    CURRENT_TASK.with(std::cell::Cell::get).unwrap_or_else(|| {
        AMBIENT_TASK.with(|ambient| {
            ambient.get().unwrap_or_else(|| {
                let id = TaskId::next();
                ambient.set(Some(id));
                id
            })
        })
    })
}

/// Returns the loop currently being driven by this thread, if any.
#[must_use]
pub fn current_loop() -> Option<EventLoop> {
    CURRENT_LOOP.with(|slot| slot.borrow().clone())
}

/// Scope guard installing a task identity for the duration of a poll.
struct TaskScope {
    previous: Option<TaskId>,
}

impl TaskScope {
    fn enter(id: TaskId) -> Self {
        let previous = CURRENT_TASK.with(|current| current.replace(Some(id)));
        Self { previous }
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        let previous = self.previous;
        CURRENT_TASK.with(|current| current.set(previous));
    }
}

/// A spawned task: its future, its identity, and its re-queue plumbing.
struct TaskCell {
    id: TaskId,
    future: Mutex<Option<Pin<Box<dyn Future<Output = ()> + Send>>>>,
    /// Guards against duplicate entries in the ready queue.
    queued: AtomicBool,
    shared: Weak<LoopShared>,
}

impl Wake for TaskCell {
    fn wake(self: Arc<Self>) {
        if let Some(shared) = self.shared.upgrade() {
            shared.enqueue(self);
        }
    }

    fn wake_by_ref(self: &Arc<Self>) {
        Arc::clone(self).wake();
    }
}

struct LoopShared {
    ready: Mutex<VecDeque<Arc<TaskCell>>>,
    /// The thread currently inside `block_on`, to unpark on new work.
    driver: Mutex<Option<Thread>>,
    /// Tasks spawned and not yet run to completion.
    live: AtomicUsize,
}

impl LoopShared {
    fn enqueue(&self, cell: Arc<TaskCell>) {
        if !cell.queued.swap(true, Ordering::AcqRel) {
            self.ready
                .lock()
                .expect("loop ready queue poisoned")
                .push_back(cell);
        }
        self.unpark_driver();
    }

    fn unpark_driver(&self) {
        if let Some(thread) = &*self.driver.lock().expect("loop driver slot poisoned") {
            thread.unpark();
        }
    }

    fn pop_ready(&self) -> Option<Arc<TaskCell>> {
        self.ready
            .lock()
            .expect("loop ready queue poisoned")
            .pop_front()
    }

    fn ready_is_empty(&self) -> bool {
        self.ready
            .lock()
            .expect("loop ready queue poisoned")
            .is_empty()
    }
}

/// Waker for the `block_on` main future: flags and unparks the driver.
struct MainWaker {
    thread: Thread,
    notified: AtomicBool,
}

impl Wake for MainWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.notified.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

/// A single-threaded cooperative event loop.
///
/// Cloning yields another handle to the same loop; handles are `Send` and
/// `Sync`, so any thread may [`spawn`](Self::spawn) onto it.
#[derive(Clone)]
pub struct EventLoop {
    shared: Arc<LoopShared>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Creates a new, idle loop.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(LoopShared {
                ready: Mutex::new(VecDeque::new()),
                driver: Mutex::new(None),
                live: AtomicUsize::new(0),
            }),
        }
    }

    /// True while some thread is inside [`block_on`](Self::block_on).
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared
            .driver
            .lock()
            .expect("loop driver slot poisoned")
            .is_some()
    }

    /// Number of spawned tasks not yet run to completion.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// True if `other` is a handle to this same loop.
    #[must_use]
    pub fn same_loop(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Spawns `future` onto this loop, returning an awaitable handle to its
    /// output.
    ///
    /// Callable from any thread. A panic inside the task is caught and
    /// surfaces as [`Error::TaskPanicked`] on the handle; a task dropped by
    /// the loop before completing surfaces as [`Error::TaskDropped`].
    pub fn spawn<F>(&self, future: F) -> TaskFuture<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (promise, handle) = promise::pair();
        self.shared.live.fetch_add(1, Ordering::AcqRel);

        let live = Arc::clone(&self.shared);
        let wrapped = async move {
            let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(value) => Ok(value),
                Err(payload) => Err(Error::from_panic(payload.as_ref())),
            };
            live.live.fetch_sub(1, Ordering::AcqRel);
            promise.complete(outcome);
        };

        let cell = Arc::new(TaskCell {
            id: TaskId::next(),
            future: Mutex::new(Some(Box::pin(wrapped))),
            queued: AtomicBool::new(false),
            shared: Arc::downgrade(&self.shared),
        });
        trace!(task = %cell.id, "task spawned");
        self.shared.enqueue(cell);
        handle
    }

    /// Drives `future` to completion on the calling thread, also running
    /// every task spawned onto this loop while it waits.
    ///
    /// Returns as soon as `future` completes; still-pending spawned tasks
    /// stay queued for the next `block_on`.
    ///
    /// # Panics
    ///
    /// Panics if an event loop is already running on the calling thread
    /// (nested `block_on` is a programming error), or if another thread is
    /// currently driving this loop.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let already_running = CURRENT_LOOP.with(|slot| slot.borrow().is_some());
        assert!(
            !already_running,
            "block_on called while an event loop is already running on this thread"
        );
        {
            let mut driver = self
                .shared
                .driver
                .lock()
                .expect("loop driver slot poisoned");
            assert!(
                driver.is_none(),
                "block_on called while another thread is driving this loop"
            );
            *driver = Some(thread::current());
        }
        CURRENT_LOOP.with(|slot| *slot.borrow_mut() = Some(self.clone()));
        let _cleanup = DriverGuard {
            shared: Arc::clone(&self.shared),
        };

        let main_id = TaskId::next();
        trace!(task = %main_id, "block_on entered");
        let main_waker = Arc::new(MainWaker {
            thread: thread::current(),
            notified: AtomicBool::new(false),
        });
        let waker = Waker::from(Arc::clone(&main_waker));
        let mut cx = Context::from_waker(&waker);
        let mut main = std::pin::pin!(future);

        let mut poll_main = true;
        loop {
            if poll_main {
                let _scope = TaskScope::enter(main_id);
                if let Poll::Ready(output) = main.as_mut().poll(&mut cx) {
                    trace!(task = %main_id, "block_on finished");
                    return output;
                }
            }

            while let Some(cell) = self.shared.pop_ready() {
                cell.queued.store(false, Ordering::Release);
                Self::drive(&cell);
            }

            poll_main = main_waker.notified.swap(false, Ordering::AcqRel);
            if !poll_main && self.shared.ready_is_empty() {
                thread::park();
                poll_main = main_waker.notified.swap(false, Ordering::AcqRel);
            }
        }
    }

    fn drive(cell: &Arc<TaskCell>) {
        let waker = Waker::from(Arc::clone(cell));
        let mut cx = Context::from_waker(&waker);
        let mut slot = cell.future.lock().expect("task future slot poisoned");
        let Some(future) = slot.as_mut() else {
            return;
        };
        let _scope = TaskScope::enter(cell.id);
        if future.as_mut().poll(&mut cx).is_ready() {
            trace!(task = %cell.id, "task finished");
            *slot = None;
        }
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("running", &self.is_running())
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}

/// Clears the driver registration and this thread's current-loop slot.
struct DriverGuard {
    shared: Arc<LoopShared>,
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        CURRENT_LOOP.with(|slot| *slot.borrow_mut() = None);
        *self
            .shared
            .driver
            .lock()
            .expect("loop driver slot poisoned") = None;
    }
}
