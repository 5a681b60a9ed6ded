//! End-to-end execution queue behavior, including the thread-domain entry.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crosslane::executor::{PoolConfig, ThreadPool};
use crosslane::promise;
use crosslane::queue::{AsyncExecutionQueue, QueueOptions};
use crosslane::runtime::scheduler::{self, SchedulerOptions};
use crosslane::runtime::EventLoop;
use crosslane::test_utils::init_test_logging;
use crosslane::{Error, test_phase, test_section};

fn serial_pool(prefix: &str) -> ThreadPool {
    ThreadPool::new(PoolConfig {
        workers: 1,
        thread_name_prefix: prefix.to_string(),
    })
}

/// One scenario function: the designated loop is process-wide state, so the
/// blocking-entry test shares the process with nothing else.
#[test]
fn queue_end_to_end() {
    init_test_logging();
    test_phase!("queue_end_to_end");

    let pool = serial_pool("queue-e2e");
    let main_loop = EventLoop::new();
    let queue = AsyncExecutionQueue::new(QueueOptions {
        executor: Some(pool.clone()),
    });

    test_section!("dispatch order is FIFO with jittered producers");
    let order = Arc::new(Mutex::new(Vec::new()));
    main_loop.block_on(async {
        scheduler::initialize(SchedulerOptions::default()).unwrap();
        queue.start().unwrap();

        let mut handles = Vec::new();
        for index in 0..24_u32 {
            let order = Arc::clone(&order);
            // Jitter the job bodies so completion time varies; dispatch
            // order must stay FIFO regardless.
            let pause = Duration::from_micros(u64::from(fastrand::u32(0..200)));
            handles.push(
                queue
                    .submit(move || {
                        thread::sleep(pause);
                        order.lock().unwrap().push(index);
                    })
                    .unwrap(),
            );
        }
        for handle in handles {
            handle.await.unwrap();
        }
    });
    assert_eq!(*order.lock().unwrap(), (0..24).collect::<Vec<_>>());

    test_section!("blocking submission from a plain thread");
    let remote_queue = queue.clone();
    let (signal, signal_future) = promise::pair::<u32>();
    let submitter = thread::spawn(move || {
        let value = remote_queue
            .submit_blocking(None, || 3 + 4)
            .unwrap()
            .wait()
            .unwrap();
        signal.complete(Ok(value));
    });
    let value = main_loop
        .block_on(async move { signal_future.await })
        .unwrap();
    assert_eq!(value, 7);
    submitter.join().unwrap();

    test_section!("close drains everything enqueued before the sentinel");
    main_loop.block_on(async {
        let mut handles = Vec::new();
        for index in 0..8_u32 {
            handles.push(queue.submit(move || index * 2).unwrap());
        }
        queue.close().await.unwrap();
        // Nothing enqueued before the sentinel is dropped.
        for (index, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), (index as u32) * 2);
        }
    });
    assert!(queue.is_closed());

    test_section!("the queue rejects work after close");
    assert_eq!(queue.submit(|| 0).unwrap_err(), Error::QueueClosed);
    let late = main_loop.block_on(async { queue.close().await });
    assert_eq!(late, Ok(()));

    // The blocking entry reports closure on its returned handle; the
    // designated loop has to be driven for the enqueue hop to run.
    let remote_queue = queue.clone();
    let (signal, signal_future) = promise::pair::<Error>();
    let late_submitter = thread::spawn(move || {
        let err = remote_queue
            .submit_blocking(None, || 0)
            .unwrap()
            .wait()
            .unwrap_err();
        signal.complete(Ok(err));
    });
    let err = main_loop
        .block_on(async move { signal_future.await })
        .unwrap();
    assert_eq!(err, Error::QueueClosed);
    late_submitter.join().unwrap();

    pool.shutdown(true);
}
