//! Execution pool: runs submitted jobs on their own OS threads.
//!
//! Jobs run on the blocking thread pool of a runtime the pool owns: threads
//! are spawned on demand, reused while busy, and retired after sitting idle
//! for `keep_alive`. A FIFO semaphore caps how many jobs hold a thread at once;
//! jobs beyond the cap wait inside the pool, never in the submitter.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use tokio::sync::{Semaphore, watch};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// Jobs allowed per available CPU when no explicit bound is configured.
const JOBS_PER_CPU: usize = 10;

/// Blocking threads kept beyond the job bound for the runtime's own use
/// (file and stdio operations).
const BLOCKING_HEADROOM: usize = 16;

/// Configuration for the execution pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of jobs executing at the same time.
    pub max_concurrent: usize,
    /// How long an idle worker thread lives before it is retired.
    pub keep_alive: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            keep_alive: Duration::from_secs(60),
        }
    }
}

/// Ten jobs per available CPU.
pub fn default_max_concurrent() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        * JOBS_PER_CPU
}

/// Elastic, bounded pool of job threads.
pub struct ExecutionPool {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    max_concurrent: usize,
    submitted: AtomicU64,
    active: Arc<AtomicUsize>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl ExecutionPool {
    pub fn new(config: &PoolConfig) -> Result<Self> {
        if config.max_concurrent == 0 {
            return Err(Error::Config(
                "execution pool needs max_concurrent of at least 1".to_string(),
            ));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .max_blocking_threads(config.max_concurrent + BLOCKING_HEADROOM)
            .thread_keep_alive(config.keep_alive)
            .thread_name("conveyer-exec")
            .enable_all()
            .build()?;

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            tracker: TaskTracker::new(),
            max_concurrent: config.max_concurrent,
            submitted: AtomicU64::new(0),
            active: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(watch::Sender::new(0)),
        })
    }

    /// Hand a job over for execution. Never waits for the job to start.
    ///
    /// # Errors
    ///
    /// [`Error::PoolClosed`] once [`shutdown`](Self::shutdown) has begun.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            return Err(Error::PoolClosed);
        }
        let seq = self.submitted.fetch_add(1, Ordering::Relaxed) + 1;

        let permits = Arc::clone(&self.permits);
        let active = Arc::clone(&self.active);
        let handle = self.handle.clone();
        let in_flight = InFlight::enter(Arc::clone(&self.in_flight));
        self.tracker.spawn_on(
            async move {
                let _in_flight = in_flight;
                let Ok(permit) = permits.acquire_owned().await else {
                    warn!(seq, "execution pool closed before job could start");
                    return;
                };
                let ran = tokio::task::spawn_blocking(move || {
                    let _running = Running::enter(active);
                    handle.block_on(job);
                    drop(permit);
                })
                .await;
                if let Err(e) = ran {
                    error!(seq, error = %e, "job panicked");
                }
            },
            &self.handle,
        );
        Ok(())
    }

    /// Number of jobs submitted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Number of jobs executing right now.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of jobs submitted but not finished yet.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every job submitted so far has finished.
    ///
    /// Returns at once when nothing is in flight. Jobs submitted while waiting
    /// are waited for too.
    pub async fn idle(&self) {
        let mut in_flight = self.in_flight.subscribe();
        let _ = in_flight.wait_for(|n| *n == 0).await;
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn is_shut_down(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Stop accepting jobs and wait for submitted ones to finish.
    ///
    /// Running jobs are never interrupted. With a `timeout`, gives up waiting
    /// after it elapses and abandons the jobs still running. Returns whether
    /// every job finished.
    ///
    /// Blocks the calling thread. Inside a tokio runtime the wait happens on
    /// a separate thread, and on a multi-thread runtime the caller's worker is
    /// handed off first with [`tokio::task::block_in_place`].
    pub fn shutdown(&self, timeout: Option<Duration>) -> bool {
        self.tracker.close();
        let Some(runtime) = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return true;
        };

        let Ok(current) = Handle::try_current() else {
            return self.teardown(runtime, timeout);
        };
        let teardown = move || {
            std::thread::scope(|scope| {
                std::thread::Builder::new()
                    .name("conveyer-teardown".to_string())
                    .spawn_scoped(scope, || self.teardown(runtime, timeout))
                    .map_err(|e| error!(error = %e, "cannot spawn teardown thread"))
                    .and_then(|handle| {
                        handle
                            .join()
                            .map_err(|_| error!("execution pool teardown panicked"))
                    })
                    .unwrap_or(false)
            })
        };
        match current.runtime_flavor() {
            RuntimeFlavor::MultiThread => tokio::task::block_in_place(teardown),
            _ => teardown(),
        }
    }

    /// Drain and drop the owned runtime. Runs outside any runtime context.
    fn teardown(&self, runtime: Runtime, timeout: Option<Duration>) -> bool {
        let pending = self.tracker.len();
        if pending > 0 {
            info!(pending, "waiting for running jobs to finish");
        }
        let drained = match timeout {
            None => {
                runtime.block_on(self.tracker.wait());
                true
            }
            Some(limit) => runtime
                .block_on(tokio::time::timeout(limit, self.tracker.wait()))
                .is_ok(),
        };
        if !drained {
            warn!(
                abandoned = self.tracker.len(),
                "execution pool shut down with jobs still running"
            );
        }
        self.permits.close();
        runtime.shutdown_background();
        debug!("execution pool shut down");
        drained
    }
}

/// Counts a job as active for as long as it lives, panics included.
struct Running(Arc<AtomicUsize>);

impl Running {
    fn enter(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Counts a submitted job until its task is gone, however it ended.
struct InFlight(Arc<watch::Sender<usize>>);

impl InFlight {
    fn enter(in_flight: Arc<watch::Sender<usize>>) -> Self {
        in_flight.send_modify(|n| *n += 1);
        Self(in_flight)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl std::fmt::Debug for ExecutionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPool")
            .field("max_concurrent", &self.max_concurrent)
            .field("submitted", &self.submitted())
            .field("active", &self.active())
            .finish()
    }
}
