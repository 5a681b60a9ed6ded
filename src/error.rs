//! Error types and error handling strategy for crosslane.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Usage errors surface synchronously at the call site, never deferred
//! - Panics inside bridged or spawned work are isolated and converted to
//!   [`Error::TaskPanicked`]; they never unwind across a future boundary
//! - Task failures travel on the paired future and are re-raised at result
//!   retrieval, never swallowed

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for all crosslane operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A thread-local slot was read before any value was stored for the
    /// calling thread.
    #[error("thread-local slot `{0}` is not initialized")]
    SlotNotInitialized(String),

    /// A lock release was attempted by a worker that does not own the lock.
    #[error("lock released by a worker that does not own it")]
    NotOwner,

    /// An operation required an event loop running on the calling thread.
    #[error("no event loop is running on this thread")]
    NoRunningLoop,

    /// `scheduler::initialize` was called a second time.
    #[error("designated scheduler loop is already initialized")]
    SchedulerAlreadyInitialized,

    /// A cross-thread submission was attempted before `scheduler::initialize`.
    #[error("scheduler is not initialized; call scheduler::initialize from the designated loop first")]
    SchedulerNotInitialized,

    /// The execution queue consumer was started twice.
    #[error("execution queue consumer is already started")]
    QueueAlreadyStarted,

    /// A submission or start was attempted on a closed execution queue.
    #[error("execution queue is closed")]
    QueueClosed,

    /// A bridged or spawned task panicked; the payload message is preserved.
    #[error("task panicked: {0}")]
    TaskPanicked(String),

    /// The producing side of a future was dropped before completing it.
    ///
    /// Seen when an executor rejects a job after shutdown or a task is
    /// dropped by its loop without running to completion.
    #[error("task was dropped before completion")]
    TaskDropped,
}

impl Error {
    /// Builds a [`Error::TaskPanicked`] from a `catch_unwind` payload.
    ///
    /// String and `&str` payloads (the overwhelmingly common cases from
    /// `panic!`) keep their message; anything else gets a generic one.
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "task panicked with a non-string payload".to_string());
        Self::TaskPanicked(message)
    }

    /// True for errors that indicate API misuse rather than task failure.
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        !matches!(self, Self::TaskPanicked(_) | Self::TaskDropped)
    }
}

impl Error {
    /// Returns a short, stable identifier for the error kind.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::SlotNotInitialized(_) => "slot_not_initialized",
            Self::NotOwner => "not_owner",
            Self::NoRunningLoop => "no_running_loop",
            Self::SchedulerAlreadyInitialized => "scheduler_already_initialized",
            Self::SchedulerNotInitialized => "scheduler_not_initialized",
            Self::QueueAlreadyStarted => "queue_already_started",
            Self::QueueClosed => "queue_closed",
            Self::TaskPanicked(_) => "task_panicked",
            Self::TaskDropped => "task_dropped",
        }
    }
}
