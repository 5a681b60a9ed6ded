//! A plain FIFO thread pool.
//!
//! The pool the execution bridge resolves work onto: named worker threads
//! pulling boxed jobs off a shared FIFO queue. Jobs submitted after
//! [`shutdown`](ThreadPool::shutdown) are rejected (and any future paired
//! with them resolves [`TaskDropped`](crate::Error::TaskDropped) through the
//! promise drop path).

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::tracing_compat::{error, trace};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Configuration for [`ThreadPool::new`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads. Clamped to at least 1.
    pub workers: usize,
    /// Prefix for worker thread names (`<prefix>-<index>`).
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            thread_name_prefix: "crosslane-worker".to_string(),
        }
    }
}

/// Default sizing: one worker per available core, within [2, 8].
#[must_use]
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism().map_or(4, |n| n.get().clamp(2, 8))
}

struct PoolState {
    jobs: VecDeque<Job>,
    shutdown: bool,
    handles: Vec<JoinHandle<()>>,
}

struct PoolInner {
    state: Mutex<PoolState>,
    work: Condvar,
}

/// A fixed-size FIFO thread pool.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct ThreadPool {
    inner: Arc<PoolInner>,
    workers: usize,
}

impl ThreadPool {
    /// Creates the pool and starts its workers.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let workers = config.workers.max(1);
        let inner = Arc::new(PoolInner {
            state: Mutex::new(PoolState {
                jobs: VecDeque::new(),
                shutdown: false,
                handles: Vec::with_capacity(workers),
            }),
            work: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let worker_inner = Arc::clone(&inner);
            let handle = std::thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name_prefix))
                .spawn(move || worker_loop(&worker_inner))
                .expect("failed to spawn pool worker thread");
            handles.push(handle);
        }
        inner
            .state
            .lock()
            .expect("pool state poisoned")
            .handles
            .extend(handles);

        Self { inner, workers }
    }

    /// Creates a pool with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(PoolConfig::default())
    }

    /// Number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Number of jobs queued and not yet picked up.
    #[must_use]
    pub fn queued_jobs(&self) -> usize {
        self.inner.state.lock().expect("pool state poisoned").jobs.len()
    }

    /// Submits a job. Returns `false` (dropping the job) if the pool has
    /// been shut down.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) -> bool {
        {
            let mut state = self.inner.state.lock().expect("pool state poisoned");
            if state.shutdown {
                trace!("pool rejected job after shutdown");
                return false;
            }
            state.jobs.push_back(Box::new(job));
        }
        self.inner.work.notify_one();
        true
    }

    /// Shuts the pool down. Already-queued jobs still run; new submissions
    /// are rejected. With `wait`, blocks until every worker has exited.
    ///
    /// Calling with `wait = true` from inside a worker of this same pool
    /// would self-join; don't.
    pub fn shutdown(&self, wait: bool) {
        let handles = {
            let mut state = self.inner.state.lock().expect("pool state poisoned");
            state.shutdown = true;
            if wait {
                std::mem::take(&mut state.handles)
            } else {
                Vec::new()
            }
        };
        self.inner.work.notify_all();
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// True once shutdown has begun.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().expect("pool state poisoned").shutdown
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.workers)
            .field("queued_jobs", &self.queued_jobs())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn worker_loop(inner: &Arc<PoolInner>) {
    loop {
        let job = {
            let mut state = inner.state.lock().expect("pool state poisoned");
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    break job;
                }
                if state.shutdown {
                    return;
                }
                state = inner.work.wait(state).expect("pool state poisoned");
            }
        };
        // Bridge jobs catch their own panics; this is the backstop that
        // keeps a worker alive if a raw job unwinds anyway.
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("pool job panicked past its own isolation");
        }
    }
}
