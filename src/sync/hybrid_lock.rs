//! A reentrant lock usable from both threads and loop tasks.
//!
//! [`HybridLock`] carries two logically separate locks behind one object:
//! a thread-domain lock (acquire blocks the OS thread) and a task-domain
//! lock (acquire suspends the task). The domains are independent — a thread
//! holding the sync side does not block a task taking the async side, and
//! vice versa. Both sides are reentrant for their owning worker and
//! FIFO-fair for waiters.
//!
//! # Fairness
//!
//! Waiters queue in arrival order. A releasing owner wakes every waiter;
//! each re-checks the head-of-queue condition, so only the oldest waiter
//! proceeds. This is strict FIFO per domain (same discipline as the
//! waiter-id queues in the runtime's other primitives).
//!
//! # Usage errors
//!
//! Releasing a lock the calling worker does not own returns
//! [`Error::NotOwner`] and leaves the lock state untouched.
//!
//! # Example
//!
//! ```
//! use crosslane::sync::HybridLock;
//!
//! let lock = HybridLock::new();
//! {
//!     let _guard = lock.lock();
//!     // reentrant: same thread may lock again
//!     let _inner = lock.lock();
//!     assert_eq!(lock.sync_depth(), 2);
//! }
//! assert_eq!(lock.sync_depth(), 0);
//! assert!(lock.sync_owner().is_none());
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Condvar, Mutex};
use std::task::{Context, Poll, Waker};
use std::thread::{self, ThreadId};

use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::runtime::{TaskId, current_task_id};
use crate::tracing_compat::trace;

struct SyncState {
    owner: Option<ThreadId>,
    count: usize,
    waiters: VecDeque<ThreadId>,
}

struct AsyncWaiter {
    task: TaskId,
    waker: Option<Waker>,
}

struct AsyncState {
    owner: Option<TaskId>,
    count: usize,
    waiters: VecDeque<AsyncWaiter>,
}

/// A dual-domain reentrant lock with FIFO-fair wait queues.
pub struct HybridLock {
    sync: Mutex<SyncState>,
    sync_free: Condvar,
    task: Mutex<AsyncState>,
}

impl Default for HybridLock {
    fn default() -> Self {
        Self::new()
    }
}

impl HybridLock {
    /// Creates an unlocked lock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sync: Mutex::new(SyncState {
                owner: None,
                count: 0,
                waiters: VecDeque::new(),
            }),
            sync_free: Condvar::new(),
            task: Mutex::new(AsyncState {
                owner: None,
                count: 0,
                waiters: VecDeque::new(),
            }),
        }
    }

    // ── Thread domain ───────────────────────────────────────────────────

    /// Acquires the thread-domain lock, blocking until available.
    ///
    /// Reentrant: if the calling thread already owns it, the depth is
    /// incremented and the call returns immediately. Waits unboundedly.
    pub fn acquire(&self) {
        let me = thread::current().id();
        let mut state = self.sync.lock().expect("hybrid lock sync state poisoned");
        if state.owner == Some(me) {
            state.count += 1;
            return;
        }
        state.waiters.push_back(me);
        while state.owner.is_some() || state.waiters.front() != Some(&me) {
            state = self
                .sync_free
                .wait(state)
                .expect("hybrid lock sync state poisoned");
        }
        state.waiters.pop_front();
        state.owner = Some(me);
        state.count = 1;
        trace!(owner = ?me, "sync lock acquired");
    }

    /// Releases one level of the thread-domain lock.
    ///
    /// # Errors
    ///
    /// [`Error::NotOwner`] if the calling thread does not own the lock; the
    /// lock state is untouched in that case.
    pub fn release(&self) -> Result<()> {
        self.release_sync_as(thread::current().id())
    }

    fn release_sync_as(&self, me: ThreadId) -> Result<()> {
        let mut state = self.sync.lock().expect("hybrid lock sync state poisoned");
        if state.owner != Some(me) {
            return Err(Error::NotOwner);
        }
        state.count -= 1;
        if state.count == 0 {
            state.owner = None;
            let has_waiters = !state.waiters.is_empty();
            drop(state);
            trace!(owner = ?me, "sync lock released");
            if has_waiters {
                self.sync_free.notify_all();
            }
        }
        Ok(())
    }

    /// Scoped acquisition: acquires and returns a guard that releases on
    /// drop, on all exit paths.
    pub fn lock(&self) -> SyncGuard<'_> {
        self.acquire();
        SyncGuard {
            lock: self,
            thread: thread::current().id(),
        }
    }

    /// Current reentrancy depth of the thread-domain lock.
    #[must_use]
    pub fn sync_depth(&self) -> usize {
        self.sync.lock().expect("hybrid lock sync state poisoned").count
    }

    /// Owning thread of the thread-domain lock, if held.
    #[must_use]
    pub fn sync_owner(&self) -> Option<ThreadId> {
        self.sync.lock().expect("hybrid lock sync state poisoned").owner
    }

    /// Number of threads waiting on the thread-domain lock.
    #[must_use]
    pub fn sync_waiters(&self) -> usize {
        self.sync
            .lock()
            .expect("hybrid lock sync state poisoned")
            .waiters
            .len()
    }

    // ── Task domain ─────────────────────────────────────────────────────

    /// Acquires the task-domain lock, suspending the calling task until
    /// available. Reentrant for the owning task. Waits unboundedly.
    pub fn acquire_async(&self) -> AcquireAsync<'_> {
        AcquireAsync {
            lock: self,
            me: None,
            queued: false,
            done: false,
        }
    }

    /// Releases one level of the task-domain lock.
    ///
    /// Releasing never suspends, so this is a plain call even though
    /// acquisition is a future.
    ///
    /// # Errors
    ///
    /// [`Error::NotOwner`] if the calling task does not own the lock.
    pub fn release_async(&self) -> Result<()> {
        self.release_async_as(current_task_id())
    }

    fn release_async_as(&self, me: TaskId) -> Result<()> {
        let mut state = self.task.lock().expect("hybrid lock task state poisoned");
        if state.owner != Some(me) {
            return Err(Error::NotOwner);
        }
        state.count -= 1;
        if state.count == 0 {
            state.owner = None;
            let wakers: SmallVec<[Waker; 4]> = state
                .waiters
                .iter_mut()
                .filter_map(|waiter| waiter.waker.take())
                .collect();
            drop(state);
            trace!(owner = %me, "async lock released");
            for waker in wakers {
                waker.wake();
            }
        }
        Ok(())
    }

    /// Scoped acquisition for the task domain.
    pub async fn lock_async(&self) -> AsyncGuard<'_> {
        self.acquire_async().await;
        AsyncGuard {
            lock: self,
            task: current_task_id(),
        }
    }

    /// Current reentrancy depth of the task-domain lock.
    #[must_use]
    pub fn async_depth(&self) -> usize {
        self.task.lock().expect("hybrid lock task state poisoned").count
    }

    /// Owning task of the task-domain lock, if held.
    #[must_use]
    pub fn async_owner(&self) -> Option<TaskId> {
        self.task.lock().expect("hybrid lock task state poisoned").owner
    }

    /// Number of tasks waiting on the task-domain lock.
    #[must_use]
    pub fn async_waiters(&self) -> usize {
        self.task
            .lock()
            .expect("hybrid lock task state poisoned")
            .waiters
            .len()
    }
}

impl std::fmt::Debug for HybridLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridLock")
            .field("sync_depth", &self.sync_depth())
            .field("sync_waiters", &self.sync_waiters())
            .field("async_depth", &self.async_depth())
            .field("async_waiters", &self.async_waiters())
            .finish()
    }
}

/// Future returned by [`HybridLock::acquire_async`].
#[must_use = "the lock is only acquired once this future completes"]
pub struct AcquireAsync<'a> {
    lock: &'a HybridLock,
    /// Identity captured at first poll; stable for the future's lifetime.
    me: Option<TaskId>,
    queued: bool,
    done: bool,
}

impl Future for AcquireAsync<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let me = *this.me.get_or_insert_with(current_task_id);
        let mut state = this
            .lock
            .task
            .lock()
            .expect("hybrid lock task state poisoned");

        if !this.queued {
            if state.owner == Some(me) {
                state.count += 1;
                this.done = true;
                return Poll::Ready(());
            }
            state.waiters.push_back(AsyncWaiter {
                task: me,
                waker: None,
            });
            this.queued = true;
        }

        if state.owner.is_none() && state.waiters.front().map(|w| w.task) == Some(me) {
            state.waiters.pop_front();
            state.owner = Some(me);
            state.count = 1;
            this.queued = false;
            this.done = true;
            trace!(owner = %me, "async lock acquired");
            return Poll::Ready(());
        }

        if let Some(entry) = state.waiters.iter_mut().find(|w| w.task == me) {
            entry.waker = Some(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl Drop for AcquireAsync<'_> {
    fn drop(&mut self) {
        if !self.queued || self.done {
            return;
        }
        // Dropped mid-wait: leave the queue, and hand the head its wakeup
        // if the lock is free (our own wake may have been the one consumed).
        let Some(me) = self.me else { return };
        let mut state = self
            .lock
            .task
            .lock()
            .expect("hybrid lock task state poisoned");
        if let Some(position) = state.waiters.iter().position(|w| w.task == me) {
            state.waiters.remove(position);
        }
        let head_waker = if state.owner.is_none() {
            state
                .waiters
                .front_mut()
                .and_then(|waiter| waiter.waker.take())
        } else {
            None
        };
        drop(state);
        if let Some(waker) = head_waker {
            waker.wake();
        }
    }
}

/// Guard for the thread domain; releases one level on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SyncGuard<'a> {
    lock: &'a HybridLock,
    thread: ThreadId,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        // The guard proves ownership at this depth; release cannot fail.
        let _ = self.lock.release_sync_as(self.thread);
    }
}

/// Guard for the task domain; releases one level on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct AsyncGuard<'a> {
    lock: &'a HybridLock,
    task: TaskId,
}

impl Drop for AsyncGuard<'_> {
    fn drop(&mut self) {
        let _ = self.lock.release_async_as(self.task);
    }
}
