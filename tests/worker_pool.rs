use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use objectfs_core::WorkerPool;

fn factorial(n: u64) -> u64 {
    (1..=n).product()
}

#[test]
fn submit_callable_runs_concurrently_across_workers() {
    let pool = WorkerPool::new(4);
    let handles: Vec<_> = (1..=10u64)
        .map(|n| pool.submit_callable(move || factorial(n)))
        .collect();
    let results: Vec<u64> = handles.into_iter().map(|h| h.join()).collect();
    assert_eq!(results, (1..=10u64).map(factorial).collect::<Vec<_>>());
    pool.stop_and_join();
}

#[test]
fn stop_and_join_is_idempotent_and_leaves_no_active_workers() {
    let pool = Arc::new(WorkerPool::new(2));
    let counter = Arc::new(AtomicU64::new(0));
    for _ in 0..5 {
        let counter = counter.clone();
        pool.submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }
    pool.stop_and_join();
    pool.stop_and_join();
    assert_eq!(pool.active_count(), 0);
}
