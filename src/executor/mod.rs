//! Thread-pool executor and the cross-domain execution bridge.

pub mod bridge;
pub mod pool;

pub use bridge::{
    exec_async_in_executor, exec_async_in_executor_blocking, exec_in_executor,
    exec_in_executor_blocking, resolve_executor,
};
pub use pool::{PoolConfig, ThreadPool, default_worker_count};
