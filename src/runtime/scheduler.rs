//! The process-wide designated loop for cross-thread submission.
//!
//! Cross-thread coroutine submission needs one agreed target. [`initialize`]
//! captures the loop running on the calling thread (normally the main
//! thread's loop) as that target, exactly once for the process lifetime;
//! reassignment is a fatal usage error. [`run_threadsafe`] and
//! [`await_threadsafe`] then schedule futures onto it from any thread.
//!
//! # Setup
//!
//! ```ignore
//! let main_loop = EventLoop::new();
//! main_loop.block_on(async {
//!     scheduler::initialize(SchedulerOptions::default())?;
//!     // ... application ...
//! });
//! ```

use std::future::Future;
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::executor::ThreadPool;
use crate::promise::{self, BlockingFuture, TaskFuture};
use crate::runtime::{EventLoop, current_loop};
use crate::tracing_compat::info;

static DESIGNATED: OnceLock<EventLoop> = OnceLock::new();
static DEFAULT_EXECUTOR: RwLock<Option<ThreadPool>> = RwLock::new(None);

/// Options for [`initialize`].
#[derive(Debug, Clone, Default)]
pub struct SchedulerOptions {
    /// Process-wide default executor for the execution bridge; `None` leaves
    /// the bridge on its built-in fallback pool.
    pub executor: Option<ThreadPool>,
}

/// Designates the loop running on the calling thread as the process-wide
/// submission target, and optionally records a default executor.
///
/// # Errors
///
/// - [`Error::NoRunningLoop`] if the calling thread is not inside
///   [`EventLoop::block_on`] — initialization must happen *on* the loop that
///   is being designated, while it runs.
/// - [`Error::SchedulerAlreadyInitialized`] on any second call.
pub fn initialize(options: SchedulerOptions) -> Result<()> {
    let designated = current_loop().ok_or(Error::NoRunningLoop)?;
    DESIGNATED
        .set(designated)
        .map_err(|_| Error::SchedulerAlreadyInitialized)?;
    if let Some(pool) = options.executor {
        *DEFAULT_EXECUTOR.write() = Some(pool);
    }
    info!("scheduler initialized; designated loop captured");
    Ok(())
}

/// Returns a handle to the designated loop.
///
/// # Errors
///
/// [`Error::SchedulerNotInitialized`] before [`initialize`].
pub fn designated_loop() -> Result<EventLoop> {
    DESIGNATED
        .get()
        .cloned()
        .ok_or(Error::SchedulerNotInitialized)
}

/// Returns the process-wide default executor recorded at initialization.
#[must_use]
pub fn default_executor() -> Option<ThreadPool> {
    DEFAULT_EXECUTOR.read().clone()
}

/// Schedules `future` onto the designated loop from any thread, returning a
/// blocking handle a synchronous caller can wait on.
///
/// # Errors
///
/// [`Error::SchedulerNotInitialized`] before [`initialize`].
pub fn run_threadsafe<F>(future: F) -> Result<BlockingFuture<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let task = designated_loop()?.spawn(future);
    let (target, blocking) = promise::blocking_pair();
    promise::chain(task, target);
    Ok(blocking)
}

/// Schedules `future` onto the designated loop, returning an awaitable
/// handle for callers running on some *other* loop.
///
/// The spawned task owns the promise of the returned future, so the pair
/// resolves together: the handle cannot complete without the task having
/// completed, and vice versa.
///
/// # Errors
///
/// [`Error::SchedulerNotInitialized`] before [`initialize`].
pub fn await_threadsafe<F>(future: F) -> Result<TaskFuture<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    Ok(designated_loop()?.spawn(future))
}
