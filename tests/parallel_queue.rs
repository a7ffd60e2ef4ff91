//! Parallel queue behaviour under the shared deadline

use kuba_rollup::fetch::{ParallelQueue, Timeout};
use kuba_rollup::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_timeout_abandons_outstanding_work() {
    let queue: ParallelQueue = ParallelQueue::new(2, Timeout::new(Duration::from_millis(100)));
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let done = Arc::clone(&done);
        queue.submit(move || async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    let err = queue.wait().await.unwrap_err();
    assert_eq!(err, Error::FetchTimeout(Duration::from_millis(100)));
    assert!(err.is_timeout());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(done.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_limit_bounds_concurrency() {
    let queue: ParallelQueue = ParallelQueue::new(3, Timeout::new(Duration::from_secs(10)));
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for _ in 0..12 {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        queue.submit(move || async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        });
    }

    let started = tokio::time::Instant::now();
    queue.wait().await.unwrap();
    assert_eq!(peak.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_first_error_wins_and_cancels_the_rest() {
    let queue: ParallelQueue = ParallelQueue::new(4, Timeout::new(Duration::from_secs(10)));
    let finished = Arc::new(AtomicUsize::new(0));

    for i in 0..4u64 {
        let finished = Arc::clone(&finished);
        queue.submit(move || async move {
            tokio::time::sleep(Duration::from_millis(10 * (i + 1))).await;
            if i == 1 {
                return Err(Error::Internal(format!("task {} failed", i)));
            }
            if i == 2 {
                return Err(Error::Internal("late failure".to_string()));
            }
            finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    let err = queue.wait().await.unwrap_err();
    assert_eq!(err, Error::Internal("task 1 failed".to_string()));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_nested_queues_share_one_deadline() {
    let timeout = Timeout::new(Duration::from_millis(100));
    let outer: ParallelQueue = ParallelQueue::new(2, timeout);
    let inner_done = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let inner_done = Arc::clone(&inner_done);
        outer.submit(move || async move {
            let inner: ParallelQueue = ParallelQueue::new(2, timeout);
            for _ in 0..2 {
                let inner_done = Arc::clone(&inner_done);
                inner.submit(move || async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    inner_done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
            }
            inner.wait().await
        });
    }

    let started = tokio::time::Instant::now();
    let err = outer.wait().await.unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_millis(150));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(inner_done.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_state_collects_results() {
    let queue = ParallelQueue::with_state(4, Timeout::new(Duration::from_secs(5)), Vec::new());
    for i in 0..8 {
        let q = queue.clone();
        queue.submit(move || async move {
            q.state().lock().push(i);
            Ok(())
        });
    }
    queue.wait().await.unwrap();

    let mut seen = queue.take_state();
    seen.sort();
    assert_eq!(seen, (0..8).collect::<Vec<_>>());
}
