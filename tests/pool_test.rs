//! Execution pool: bound, draining, shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use conveyer::engine::{ExecutionPool, PoolConfig};
use conveyer::error::Error;

fn pool(max_concurrent: usize) -> ExecutionPool {
    ExecutionPool::new(&PoolConfig {
        max_concurrent,
        keep_alive: Duration::from_secs(1),
    })
    .unwrap()
}

#[test]
fn never_runs_more_than_the_bound() {
    let pool = pool(2);
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));

    for _ in 0..8 {
        let current = Arc::clone(&current);
        let peak = Arc::clone(&peak);
        let finished = Arc::clone(&finished);
        pool.submit(async move {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            finished.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }
    assert_eq!(pool.submitted(), 8);

    assert!(pool.shutdown(None));
    assert_eq!(finished.load(Ordering::SeqCst), 8);
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(pool.active(), 0);
}

#[test]
fn runs_jobs_concurrently_up_to_the_bound() {
    let pool = pool(4);
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for _ in 0..4 {
        let current = Arc::clone(&current);
        let peak = Arc::clone(&peak);
        pool.submit(async move {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            current.fetch_sub(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    assert!(pool.shutdown(None));
    assert!(peak.load(Ordering::SeqCst) > 1);
}

#[test]
fn jobs_run_on_pool_threads() {
    let pool = pool(1);
    let name = Arc::new(std::sync::Mutex::new(None));
    {
        let name = Arc::clone(&name);
        pool.submit(async move {
            *name.lock().unwrap() = std::thread::current().name().map(str::to_string);
        })
        .unwrap();
    }
    pool.shutdown(None);
    assert_eq!(name.lock().unwrap().as_deref(), Some("conveyer-exec"));
}

#[test]
fn shutdown_waits_for_running_jobs() {
    let pool = pool(1);
    let finished = Arc::new(AtomicBool::new(false));
    {
        let finished = Arc::clone(&finished);
        pool.submit(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            finished.store(true, Ordering::SeqCst);
        })
        .unwrap();
    }

    assert!(pool.shutdown(None));
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(pool.pending(), 0);
}

#[test]
fn shutdown_timeout_gives_up_on_stuck_jobs() {
    let pool = pool(1);
    pool.submit(async {
        std::thread::sleep(Duration::from_secs(2));
    })
    .unwrap();

    assert!(!pool.shutdown(Some(Duration::from_millis(50))));
    assert!(pool.is_shut_down());
}

#[test]
fn rejects_jobs_after_shutdown() {
    let pool = pool(1);
    pool.shutdown(None);
    assert!(matches!(pool.submit(async {}), Err(Error::PoolClosed)));
    // Shutting down twice is a no-op.
    assert!(pool.shutdown(None));
}

#[test]
fn zero_bound_is_a_config_error() {
    let result = ExecutionPool::new(&PoolConfig {
        max_concurrent: 0,
        keep_alive: Duration::from_secs(1),
    });
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn a_panicking_job_does_not_poison_the_pool() {
    let pool = pool(1);
    let ran = Arc::new(AtomicBool::new(false));
    pool.submit(async { panic!("job blew up") }).unwrap();
    {
        let ran = Arc::clone(&ran);
        pool.submit(async move { ran.store(true, Ordering::SeqCst) })
            .unwrap();
    }
    assert!(pool.shutdown(None));
    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(pool.active(), 0);
}
