//! An ordered, single-consumer execution queue.
//!
//! [`AsyncExecutionQueue`] serializes submitted callables through the
//! execution bridge: a single background consumer task dequeues in strict
//! FIFO order and dispatches each job onto the queue's executor, chaining
//! the job's outcome onto the future handed back at submission. Dispatch
//! order is FIFO; completion order is not guaranteed once jobs run on pool
//! threads.
//!
//! # Lifecycle
//!
//! ```text
//! not-started ──start()──► running ──close()──► closing ──sentinel──► closed
//! ```
//!
//! [`close`](AsyncExecutionQueue::close) enqueues a sentinel as the last
//! item and awaits the consumer; submissions from then on are rejected with
//! [`Error::QueueClosed`](crate::Error::QueueClosed).

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::task::{Poll, Waker};

use crate::error::{Error, Result};
use crate::executor::{self, ThreadPool};
use crate::promise::{self, BlockingFuture, TaskFuture};
use crate::runtime::{current_loop, scheduler};
use crate::tracing_compat::{debug, trace};

/// Options for [`AsyncExecutionQueue::new`].
#[derive(Debug, Clone, Default)]
pub struct QueueOptions {
    /// Executor the consumer dispatches jobs onto; `None` falls back to the
    /// bridge's resolution chain.
    pub executor: Option<ThreadPool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Closing,
    Closed,
}

type DispatchFn = Box<dyn FnOnce(Option<&ThreadPool>) + Send>;

enum QueueItem {
    Job(DispatchFn),
    /// Shutdown sentinel; terminates the consumer when dequeued.
    Close,
}

struct QueueState {
    items: VecDeque<QueueItem>,
    consumer_waker: Option<Waker>,
    phase: Phase,
}

struct QueueInner {
    state: Mutex<QueueState>,
    executor: Option<ThreadPool>,
    consumer: Mutex<Option<TaskFuture<()>>>,
}

/// An ordered task queue with one background consumer.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct AsyncExecutionQueue {
    inner: Arc<QueueInner>,
}

impl AsyncExecutionQueue {
    /// Creates an empty queue in the not-started state.
    #[must_use]
    pub fn new(options: QueueOptions) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    consumer_waker: None,
                    phase: Phase::Idle,
                }),
                executor: options.executor,
                consumer: Mutex::new(None),
            }),
        }
    }

    /// Starts the background consumer on the loop running on this thread.
    ///
    /// # Errors
    ///
    /// - [`Error::NoRunningLoop`] outside a loop.
    /// - [`Error::QueueAlreadyStarted`] if the consumer is already running.
    /// - [`Error::QueueClosed`] after close.
    pub fn start(&self) -> Result<()> {
        let event_loop = current_loop().ok_or(Error::NoRunningLoop)?;
        {
            let mut state = self.inner.state.lock().expect("queue state poisoned");
            match state.phase {
                Phase::Idle => state.phase = Phase::Running,
                Phase::Running | Phase::Closing => return Err(Error::QueueAlreadyStarted),
                Phase::Closed => return Err(Error::QueueClosed),
            }
        }
        let inner = Arc::clone(&self.inner);
        let consumer = event_loop.spawn(consume(inner));
        *self
            .inner
            .consumer
            .lock()
            .expect("queue consumer slot poisoned") = Some(consumer);
        debug!("execution queue consumer started");
        Ok(())
    }

    /// Enqueues a synchronous callable, returning its future immediately.
    ///
    /// The job is dispatched by the consumer, in FIFO order, through
    /// [`exec_in_executor`](executor::exec_in_executor) bound to the queue's
    /// executor.
    ///
    /// # Errors
    ///
    /// [`Error::QueueClosed`] once close has begun.
    pub fn submit<T, F>(&self, func: F) -> Result<TaskFuture<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue_with(None, func)
    }

    /// Enqueues an asynchronous callable; the produced future is driven to
    /// completion on the dispatching worker's thread-bound loop.
    ///
    /// # Errors
    ///
    /// [`Error::QueueClosed`] once close has begun.
    pub fn submit_async<T, F, Fut>(&self, func: F) -> Result<TaskFuture<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + 'static,
        T: Send + 'static,
    {
        let (outcome, future) = promise::pair();
        self.enqueue_job(Box::new(move |queue_pool| {
            let task = executor::exec_async_in_executor(queue_pool, func);
            promise::chain(task, outcome);
        }))?;
        Ok(future)
    }

    /// Thread-domain submission: routes the enqueue through the designated
    /// loop and returns a blocking handle for the eventual result.
    ///
    /// `executor` overrides the queue's bound executor for this one job.
    ///
    /// # Errors
    ///
    /// [`Error::SchedulerNotInitialized`] if no designated loop exists. A
    /// queue already closed surfaces as [`Error::QueueClosed`] on the
    /// returned handle.
    pub fn submit_blocking<T, F>(
        &self,
        executor: Option<&ThreadPool>,
        func: F,
    ) -> Result<BlockingFuture<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let override_pool = executor.cloned();
        let queue = self.clone();
        let (target, blocking) = promise::blocking_pair();
        let _enqueue_handle = scheduler::run_threadsafe(async move {
            match queue.enqueue_with(override_pool, func) {
                Ok(task) => promise::chain(task, target),
                Err(err) => target.complete(Err(err)),
            }
        })?;
        Ok(blocking)
    }

    /// Closes the queue: enqueues the shutdown sentinel as the last item and
    /// awaits consumer completion.
    ///
    /// Jobs enqueued strictly before the sentinel are still dispatched.
    /// Idempotent; late callers may return before the consumer's final
    /// wind-down only if another caller already took over the wait.
    pub async fn close(&self) -> Result<()> {
        let waker = {
            let mut state = self.inner.state.lock().expect("queue state poisoned");
            match state.phase {
                Phase::Idle => {
                    state.phase = Phase::Closed;
                    return Ok(());
                }
                Phase::Running => {
                    state.items.push_back(QueueItem::Close);
                    state.phase = Phase::Closing;
                    debug!("execution queue closing");
                    state.consumer_waker.take()
                }
                Phase::Closing | Phase::Closed => None,
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        let consumer = self
            .inner
            .consumer
            .lock()
            .expect("queue consumer slot poisoned")
            .take();
        if let Some(consumer) = consumer {
            consumer.await?;
        }
        Ok(())
    }

    /// True while the consumer is running (close not yet begun).
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().expect("queue state poisoned").phase == Phase::Running
    }

    /// True once the consumer has observed the sentinel (or the queue was
    /// closed before ever starting).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().expect("queue state poisoned").phase == Phase::Closed
    }

    /// Number of items waiting to be dispatched (sentinel included).
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.inner.state.lock().expect("queue state poisoned").items.len()
    }

    fn enqueue_with<T, F>(
        &self,
        override_pool: Option<ThreadPool>,
        func: F,
    ) -> Result<TaskFuture<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (outcome, future) = promise::pair();
        self.enqueue_job(Box::new(move |queue_pool| {
            let pool = override_pool.as_ref().or(queue_pool);
            let task = executor::exec_in_executor(pool, func);
            promise::chain(task, outcome);
        }))?;
        Ok(future)
    }

    fn enqueue_job(&self, dispatch: DispatchFn) -> Result<()> {
        let waker = {
            let mut state = self.inner.state.lock().expect("queue state poisoned");
            if matches!(state.phase, Phase::Closing | Phase::Closed) {
                return Err(Error::QueueClosed);
            }
            state.items.push_back(QueueItem::Job(dispatch));
            state.consumer_waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }
}

impl std::fmt::Debug for AsyncExecutionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().expect("queue state poisoned");
        f.debug_struct("AsyncExecutionQueue")
            .field("phase", &state.phase)
            .field("backlog", &state.items.len())
            .finish()
    }
}

/// The single consumer: strict FIFO dequeue, dispatch, repeat until the
/// sentinel. Per-job failures ride the job's own future; nothing here can
/// make the consumer itself fail.
async fn consume(inner: Arc<QueueInner>) {
    loop {
        let item = std::future::poll_fn(|cx| {
            let mut state = inner.state.lock().expect("queue state poisoned");
            if let Some(item) = state.items.pop_front() {
                Poll::Ready(item)
            } else {
                state.consumer_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        })
        .await;

        match item {
            QueueItem::Close => break,
            QueueItem::Job(dispatch) => {
                trace!("queue job dispatched");
                dispatch(inner.executor.as_ref());
            }
        }
    }
    inner.state.lock().expect("queue state poisoned").phase = Phase::Closed;
    debug!("execution queue consumer finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::PoolConfig;
    use crate::runtime::EventLoop;

    fn serial_pool() -> ThreadPool {
        ThreadPool::new(PoolConfig {
            workers: 1,
            thread_name_prefix: "queue-test".to_string(),
        })
    }

    #[test]
    fn start_outside_loop_is_error() {
        let queue = AsyncExecutionQueue::new(QueueOptions::default());
        assert_eq!(queue.start(), Err(Error::NoRunningLoop));
    }

    #[test]
    fn submit_and_close_roundtrip() {
        let pool = serial_pool();
        let queue = AsyncExecutionQueue::new(QueueOptions {
            executor: Some(pool.clone()),
        });
        let event_loop = EventLoop::new();

        let out = event_loop.block_on(async {
            queue.start().unwrap();
            let first = queue.submit(|| 1 + 1).unwrap();
            let second = queue.submit(|| 2 + 2).unwrap();
            queue.close().await.unwrap();
            (first.await.unwrap(), second.await.unwrap())
        });

        assert_eq!(out, (2, 4));
        assert!(queue.is_closed());
        pool.shutdown(true);
    }

    #[test]
    fn dispatch_order_is_fifo() {
        let pool = serial_pool();
        let queue = AsyncExecutionQueue::new(QueueOptions {
            executor: Some(pool.clone()),
        });
        let order = Arc::new(Mutex::new(Vec::new()));
        let event_loop = EventLoop::new();

        event_loop.block_on(async {
            queue.start().unwrap();
            let mut handles = Vec::new();
            for index in 0..10 {
                let order = Arc::clone(&order);
                handles.push(
                    queue
                        .submit(move || order.lock().unwrap().push(index))
                        .unwrap(),
                );
            }
            for handle in handles {
                handle.await.unwrap();
            }
            queue.close().await.unwrap();
        });

        // One pool worker, FIFO dispatch: execution order equals enqueue
        // order.
        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
        pool.shutdown(true);
    }

    #[test]
    fn submit_after_close_is_rejected() {
        let queue = AsyncExecutionQueue::new(QueueOptions::default());
        let event_loop = EventLoop::new();
        event_loop.block_on(async {
            queue.start().unwrap();
            queue.close().await.unwrap();
        });
        assert_eq!(queue.submit(|| 0).unwrap_err(), Error::QueueClosed);
        assert_eq!(queue.start(), Err(Error::NoRunningLoop));
    }

    #[test]
    fn double_start_is_rejected() {
        let queue = AsyncExecutionQueue::new(QueueOptions::default());
        let event_loop = EventLoop::new();
        event_loop.block_on(async {
            queue.start().unwrap();
            assert_eq!(queue.start(), Err(Error::QueueAlreadyStarted));
            queue.close().await.unwrap();
        });
    }

    #[test]
    fn close_before_start_is_immediate() {
        let queue = AsyncExecutionQueue::new(QueueOptions::default());
        let event_loop = EventLoop::new();
        event_loop.block_on(async {
            queue.close().await.unwrap();
        });
        assert!(queue.is_closed());
        assert_eq!(queue.submit(|| 0).unwrap_err(), Error::QueueClosed);
    }

    #[test]
    fn async_jobs_run_on_worker_loops() {
        let pool = serial_pool();
        let queue = AsyncExecutionQueue::new(QueueOptions {
            executor: Some(pool.clone()),
        });
        let event_loop = EventLoop::new();

        let out = event_loop.block_on(async {
            queue.start().unwrap();
            let task = queue
                .submit_async(|| async {
                    futures_lite::future::yield_now().await;
                    "from-worker-loop"
                })
                .unwrap();
            let value = task.await.unwrap();
            queue.close().await.unwrap();
            value
        });

        assert_eq!(out, "from-worker-loop");
        pool.shutdown(true);
    }
}
