//! Crosslane: a hybrid sync/async concurrency bridge.
//!
//! # Overview
//!
//! Crosslane lets the same codebase mix preemptively-scheduled threads and
//! cooperatively-scheduled tasks without losing correctness at the seam.
//! Work crosses the seam through explicit bridges that preserve the caller's
//! context and hand back a future in the caller's own domain.
//!
//! # Core pieces
//!
//! - [`sync::HybridLock`]: one lock object, two independent reentrant
//!   FIFO-fair domains — one keyed by thread, one keyed by task
//! - [`runtime::EventLoop`]: a single-threaded cooperative loop, one per
//!   worker thread that needs one ([`runtime::thread_event_loop`]), plus a
//!   process-wide designated loop for cross-thread submission
//!   ([`runtime::scheduler`])
//! - [`executor`]: a FIFO thread pool and the execution bridge
//!   (`exec_in_executor` and friends) with context snapshot/restore
//! - [`promise`]: one-shot completions consumable by `await`
//!   ([`promise::TaskFuture`]) or by blocking ([`promise::BlockingFuture`]),
//!   chainable across the two shapes
//! - [`queue::AsyncExecutionQueue`]: strict-FIFO single-consumer dispatch of
//!   submitted callables through the bridge
//! - [`registry::LocalStore`]: explicit per-thread named slots, the leaf the
//!   loop cache is built on
//! - [`context`]: context-local variables with snapshot/restore across
//!   thread hops
//!
//! # Guarantees
//!
//! - **Fairness**: lock waiters and queue dispatch are strict FIFO per domain
//! - **No silent failures**: panics inside bridged work surface as typed
//!   errors on the paired future; a dropped producer resolves its future
//!   instead of hanging it
//! - **Context travels with work**: bridged callables observe the submitter's
//!   context-local state, never mutate it
//!
//! # Setup
//!
//! Cross-thread submission needs one designated loop, initialized once from
//! the thread that drives it:
//!
//! ```
//! use crosslane::runtime::{EventLoop, scheduler};
//!
//! let main_loop = EventLoop::new();
//! main_loop.block_on(async {
//!     scheduler::initialize(scheduler::SchedulerOptions::default()).ok();
//!     // ... spawn, bridge, queue ...
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]

pub mod context;
pub mod error;
pub mod executor;
pub mod promise;
pub mod queue;
pub mod registry;
pub mod runtime;
pub mod sync;
pub mod tracing_compat;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use error::{Error, Result};
pub use executor::{ThreadPool, exec_async_in_executor, exec_in_executor};
pub use queue::{AsyncExecutionQueue, QueueOptions};
pub use registry::LocalStore;
pub use runtime::{EventLoop, TaskId, current_task_id, thread_event_loop};
pub use sync::HybridLock;
