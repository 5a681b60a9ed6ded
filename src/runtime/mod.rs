//! Event loops and thread-bound loop management.
//!
//! Two layers live here:
//!
//! - [`event_loop`]: the [`EventLoop`] itself, task identities, and the
//!   per-thread "current loop" notion.
//! - [`scheduler`]: the process-wide designated loop for cross-thread
//!   coroutine submission.
//!
//! This module adds the thread-bound loop cache: every worker thread that
//! needs to run asynchronous work gets exactly one loop, created lazily and
//! cached for the thread's remaining lifetime in a [`LocalStore`].

pub mod event_loop;
pub mod scheduler;

pub use event_loop::{EventLoop, TaskId, current_loop, current_task_id};

use std::future::Future;
use std::sync::LazyLock;

use crate::registry::LocalStore;
use crate::tracing_compat::debug;

/// One cached loop per thread, keyed by thread identity.
static THREAD_LOOPS: LazyLock<LocalStore<EventLoop>> = LazyLock::new(LocalStore::new);

const THREAD_LOOP_SLOT: &str = "thread-event-loop";

/// Returns the calling thread's event loop, creating and caching one on
/// first need. Idempotent.
///
/// If the calling thread is currently *driving* a loop, that running loop is
/// returned instead of the cached one.
#[must_use]
pub fn thread_event_loop() -> EventLoop {
    if let Some(running) = current_loop() {
        return running;
    }
    THREAD_LOOPS.get_or_create(THREAD_LOOP_SLOT, || {
        debug!("creating thread-bound event loop");
        EventLoop::new()
    })
}

/// Drives `future` to completion on the calling thread's cached loop,
/// returning its output (and propagating its panic, if any).
///
/// Used by the execution bridge when a unit of work submitted to a worker
/// thread is itself asynchronous.
pub fn block_on_thread_loop<F: Future>(future: F) -> F::Output {
    thread_event_loop().block_on(future)
}

/// Drops the calling thread's cached loop, if any.
///
/// Mostly useful in tests; worker threads normally keep their loop for life.
pub fn forget_thread_event_loop() {
    THREAD_LOOPS.remove(THREAD_LOOP_SLOT);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_loop_is_cached_per_thread() {
        let first = thread_event_loop();
        let second = thread_event_loop();
        assert!(first.same_loop(&second));

        let remote = std::thread::spawn(thread_event_loop).join().unwrap();
        assert!(!remote.same_loop(&first));
    }

    #[test]
    fn block_on_thread_loop_runs_async_work() {
        let out = block_on_thread_loop(async {
            futures_lite::future::yield_now().await;
            21 * 2
        });
        assert_eq!(out, 42);
    }

    #[test]
    fn running_loop_takes_precedence_over_cache() {
        let cached = thread_event_loop();
        let event_loop = EventLoop::new();
        let inside = event_loop.block_on(async { thread_event_loop() });
        assert!(inside.same_loop(&event_loop));
        assert!(!inside.same_loop(&cached));
    }
}
