//! Synchronization primitives spanning the thread and task domains.

pub mod hybrid_lock;

pub use hybrid_lock::{AcquireAsync, AsyncGuard, HybridLock, SyncGuard};
