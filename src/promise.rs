//! Completion futures bridging the thread and task domains.
//!
//! A [`Promise`] is the producing half of a one-shot completion. The
//! consuming half comes in two shapes, one per concurrency domain:
//!
//! - [`TaskFuture`]: awaitable from a loop task (`Future` impl).
//! - [`BlockingFuture`]: waitable from a plain thread (condvar block).
//!
//! [`chain`] transfers one completion onto another promise, which is how a
//! result produced on one future shape surfaces on the other: the bridge
//! resolves work onto a `TaskFuture` and chains it onto the promise of a
//! `BlockingFuture` for synchronous callers.
//!
//! # No hangs
//!
//! Dropping a `Promise` without completing it resolves the paired future
//! with [`Error::TaskDropped`]. Every producer-side failure mode lands on
//! the consumer as an error; nothing waits forever on a dead producer.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};

use crate::error::{Error, Result};
use crate::tracing_compat::trace;

type Callback<T> = Box<dyn FnOnce(Result<T>) + Send>;

struct Shared<T> {
    state: Mutex<State<T>>,
    done: Condvar,
}

struct State<T> {
    /// The stored outcome, present once completed and not yet consumed or
    /// forwarded.
    outcome: Option<Result<T>>,
    /// Set once a completion has been delivered (stored or forwarded).
    completed: bool,
    /// Waker of the awaiting consumer, if any.
    waker: Option<Waker>,
    /// Chained target; consumes the outcome instead of storing it.
    callback: Option<Callback<T>>,
}

/// Creates an awaitable completion pair.
#[must_use]
pub fn pair<T>() -> (Promise<T>, TaskFuture<T>) {
    let shared = new_shared();
    (
        Promise {
            shared: Arc::clone(&shared),
        },
        TaskFuture { shared },
    )
}

/// Creates a blocking completion pair.
#[must_use]
pub fn blocking_pair<T>() -> (Promise<T>, BlockingFuture<T>) {
    let shared = new_shared();
    (
        Promise {
            shared: Arc::clone(&shared),
        },
        BlockingFuture { shared },
    )
}

fn new_shared<T>() -> Arc<Shared<T>> {
    Arc::new(Shared {
        state: Mutex::new(State {
            outcome: None,
            completed: false,
            waker: None,
            callback: None,
        }),
        done: Condvar::new(),
    })
}

/// The producing half of a one-shot completion.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Promise<T> {
    /// Completes the paired future with `outcome`.
    ///
    /// The first completion wins; later calls are ignored (the producer side
    /// races only against its own drop).
    pub fn complete(self, outcome: Result<T>) {
        self.shared.deliver(outcome);
    }

    /// True once the paired future has been completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.shared.state.lock().expect("promise state poisoned").completed
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        // Completion takes the promise by value; reaching drop with an
        // incomplete state means the producer died.
        if !self.is_complete() {
            trace!("promise dropped without completion");
            self.shared.deliver(Err(Error::TaskDropped));
        }
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("completed", &self.is_complete())
            .finish()
    }
}

impl<T> Shared<T> {
    fn deliver(&self, outcome: Result<T>) {
        let mut state = self.state.lock().expect("promise state poisoned");
        if state.completed {
            return;
        }
        state.completed = true;
        if let Some(callback) = state.callback.take() {
            // Forward outside the lock; the callback may complete another
            // promise with its own locking.
            drop(state);
            callback(outcome);
            return;
        }
        state.outcome = Some(outcome);
        let waker = state.waker.take();
        drop(state);
        self.done.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Awaitable handle to a one-shot completion (the coroutine-domain future).
///
/// Single-consumer: the outcome is yielded exactly once, either by awaiting
/// or by [`chain`]ing onto another promise.
#[must_use = "futures do nothing unless awaited or chained"]
pub struct TaskFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> TaskFuture<T> {
    /// True once the producer has completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.shared.state.lock().expect("promise state poisoned").completed
    }

    /// Registers `f` to consume the outcome, immediately if already
    /// complete. Used by [`chain`].
    fn on_complete(self, f: Callback<T>) {
        let mut state = self.shared.state.lock().expect("promise state poisoned");
        if let Some(outcome) = state.outcome.take() {
            drop(state);
            f(outcome);
            return;
        }
        debug_assert!(
            !state.completed,
            "completed future with no stored outcome chained twice"
        );
        state.callback = Some(f);
    }
}

impl<T> Future for TaskFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock().expect("promise state poisoned");
        if let Some(outcome) = state.outcome.take() {
            return Poll::Ready(outcome);
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T> std::fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFuture")
            .field("completed", &self.is_complete())
            .finish()
    }
}

/// Blocking handle to a one-shot completion (the thread-domain future).
#[must_use = "futures do nothing unless waited on"]
pub struct BlockingFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> BlockingFuture<T> {
    /// Blocks the calling thread until the producer completes, then returns
    /// the outcome.
    ///
    /// Waits unboundedly; callers needing a time limit must layer their own.
    pub fn wait(self) -> Result<T> {
        let mut state = self.shared.state.lock().expect("promise state poisoned");
        loop {
            if let Some(outcome) = state.outcome.take() {
                return outcome;
            }
            state = self
                .shared
                .done
                .wait(state)
                .expect("promise state poisoned");
        }
    }

    /// True once the producer has completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.shared.state.lock().expect("promise state poisoned").completed
    }
}

impl<T> std::fmt::Debug for BlockingFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingFuture")
            .field("completed", &self.is_complete())
            .finish()
    }
}

/// Transfers the completion of `source` onto `target`.
///
/// Consumes the source, so exactly one consumer exists: when `source`
/// completes (or already has), `target` completes with the same outcome.
/// Neither side can resolve without the other following.
pub fn chain<T: Send + 'static>(source: TaskFuture<T>, target: Promise<T>) {
    source.on_complete(Box::new(move |outcome| target.complete(outcome)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::Wake;

    struct NoopWake;
    impl Wake for NoopWake {
        fn wake(self: Arc<Self>) {}
    }

    fn poll_once<T>(future: &mut TaskFuture<T>) -> Poll<Result<T>> {
        let waker = Waker::from(Arc::new(NoopWake));
        let mut cx = Context::from_waker(&waker);
        Pin::new(future).poll(&mut cx)
    }

    #[test]
    fn complete_then_await() {
        let (promise, mut future) = pair::<u32>();
        promise.complete(Ok(5));
        assert!(matches!(poll_once(&mut future), Poll::Ready(Ok(5))));
    }

    #[test]
    fn complete_then_wait() {
        let (promise, future) = blocking_pair::<u32>();
        promise.complete(Ok(5));
        assert_eq!(future.wait().unwrap(), 5);
    }

    #[test]
    fn wait_blocks_until_complete() {
        let (promise, future) = blocking_pair::<&'static str>();
        let producer = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            promise.complete(Ok("done"));
        });
        assert_eq!(future.wait().unwrap(), "done");
        producer.join().unwrap();
    }

    #[test]
    fn dropped_promise_resolves_task_dropped() {
        let (promise, mut future) = pair::<u32>();
        drop(promise);
        assert!(matches!(
            poll_once(&mut future),
            Poll::Ready(Err(Error::TaskDropped))
        ));
    }

    #[test]
    fn chain_forwards_existing_outcome() {
        let (source_promise, source) = pair::<u32>();
        source_promise.complete(Ok(9));

        let (target_promise, target) = blocking_pair::<u32>();
        chain(source, target_promise);
        assert_eq!(target.wait().unwrap(), 9);
    }

    #[test]
    fn chain_forwards_later_outcome_and_errors() {
        let (source_promise, source) = pair::<u32>();
        let (target_promise, target) = blocking_pair::<u32>();
        chain(source, target_promise);
        assert!(!target.is_complete());

        source_promise.complete(Err(Error::TaskPanicked("x".into())));
        assert_eq!(target.wait(), Err(Error::TaskPanicked("x".into())));
    }

    #[test]
    fn chain_forwards_drop_as_error() {
        let (source_promise, source) = pair::<u32>();
        let (target_promise, target) = blocking_pair::<u32>();
        chain(source, target_promise);
        drop(source_promise);
        assert_eq!(target.wait(), Err(Error::TaskDropped));
    }
}
