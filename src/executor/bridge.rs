//! The cross-domain execution bridge.
//!
//! Runs a synchronous or asynchronous callable inside a thread pool while
//! preserving the caller's context-local variables, and returns a future in
//! the caller's own concurrency domain: [`exec_in_executor`] /
//! [`exec_async_in_executor`] hand back an awaitable [`TaskFuture`], the
//! `_blocking` variants a [`BlockingFuture`] for synchronous callers.
//!
//! # Executor resolution
//!
//! Explicit argument, else the process-wide default recorded by
//! [`scheduler::initialize`](crate::runtime::scheduler::initialize), else a
//! lazily-created fallback pool shared by the whole process.
//!
//! # Failure conversion
//!
//! A panic inside the dispatched callable cannot travel on a future as an
//! unwinding; it is caught on the worker and surfaces as
//! [`Error::TaskPanicked`](crate::Error::TaskPanicked) at result retrieval.

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::LazyLock;

use crate::context;
use crate::error::Error;
use crate::executor::pool::{PoolConfig, ThreadPool, default_worker_count};
use crate::promise::{self, BlockingFuture, TaskFuture};
use crate::runtime::{self, scheduler};
use crate::tracing_compat::trace;

/// Lazily-created process-wide fallback pool, used when neither an explicit
/// executor nor a scheduler default exists.
static FALLBACK_POOL: LazyLock<ThreadPool> = LazyLock::new(|| {
    ThreadPool::new(PoolConfig {
        workers: default_worker_count(),
        thread_name_prefix: "crosslane-fallback".to_string(),
    })
});

/// Resolves the effective executor for a bridge call.
#[must_use]
pub fn resolve_executor(explicit: Option<&ThreadPool>) -> ThreadPool {
    explicit
        .cloned()
        .or_else(scheduler::default_executor)
        .unwrap_or_else(|| FALLBACK_POOL.clone())
}

/// Runs `func` on an executor thread, returning an awaitable future for its
/// output.
///
/// The caller's context-local variables are snapshotted now and installed
/// around `func` on the worker thread, so context state set before the call
/// is visible inside `func` despite the thread hop. The worker's own context
/// mutations are discarded with its copy.
pub fn exec_in_executor<T, F>(executor: Option<&ThreadPool>, func: F) -> TaskFuture<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let pool = resolve_executor(executor);
    let snapshot = context::capture();
    let (promise, future) = promise::pair();
    trace!("bridging callable onto executor");
    pool.spawn(move || {
        let outcome = snapshot
            .run(|| catch_unwind(AssertUnwindSafe(func)))
            .map_err(|payload| Error::from_panic(payload.as_ref()));
        promise.complete(outcome);
    });
    // A rejected job dropped its promise; the future resolves TaskDropped.
    future
}

/// Runs the future produced by `func` to completion on an executor thread,
/// returning an awaitable future for its output.
///
/// The worker thread is guaranteed a thread-bound event loop
/// ([`runtime::thread_event_loop`]) and drives the produced future on it.
/// Context snapshot/restore behaves as in [`exec_in_executor`].
pub fn exec_async_in_executor<T, F, Fut>(executor: Option<&ThreadPool>, func: F) -> TaskFuture<T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = T> + 'static,
    T: Send + 'static,
{
    exec_in_executor(executor, move || runtime::block_on_thread_loop(func()))
}

/// [`exec_in_executor`], but returns a blocking handle a synchronous caller
/// can wait on.
pub fn exec_in_executor_blocking<T, F>(executor: Option<&ThreadPool>, func: F) -> BlockingFuture<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let task = exec_in_executor(executor, func);
    let (target, blocking) = promise::blocking_pair();
    promise::chain(task, target);
    blocking
}

/// [`exec_async_in_executor`], but returns a blocking handle.
pub fn exec_async_in_executor_blocking<T, F, Fut>(
    executor: Option<&ThreadPool>,
    func: F,
) -> BlockingFuture<T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = T> + 'static,
    T: Send + 'static,
{
    let task = exec_async_in_executor(executor, func);
    let (target, blocking) = promise::blocking_pair();
    promise::chain(task, target);
    blocking
}
