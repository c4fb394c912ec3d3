//! The conveyer: composition root owning the queue, state, log, metrics,
//! dispatch loop, and execution pool.
//!
//! ```text
//!   Created --start--> Running --close--> Closed
//!      \_________________close_____________/
//! ```
//!
//! `start` is accepted only once and nothing is accepted after `close`.
//! Ingestion failures do not change the lifecycle; they show up in
//! [`Conveyer::status`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Meter};
use tokio::sync::watch;
use tracing::{Instrument, Level, error, info, warn};

use crate::error::{Error, Result};
use crate::log::aggregator::DEFAULT_THRESHOLD;
use crate::log::{Log, LogAggregator, LogHub};
use crate::model::Work;
use crate::queue::Queue;
use crate::repo::Repo;
use crate::state::{MemoryState, ScopedState, State};
use crate::telemetry::job::{record_job_outcome, start_job_span};
use crate::telemetry::metrics;
use crate::users::Users;

use super::context::ExecutionContext;
use super::dispatch::{DispatchLoop, DispatchStatus};
use super::pool::{ExecutionPool, PoolConfig};

/// Configuration for a conveyer.
#[derive(Debug, Clone)]
pub struct ConveyerConfig {
    pub pool: PoolConfig,
    /// Minimum level of records the conveyer's log receives.
    pub log_threshold: Level,
    /// How long `close` waits for running jobs. `None` waits for all of them.
    pub drain_timeout: Option<Duration>,
    /// Root collection point the conveyer's log is attached to.
    ///
    /// Only events reaching a subscriber that carries [`LogHub::layer`] are
    /// forwarded; a hub nobody installed delivers just the summary records
    /// execution contexts push directly.
    pub hub: LogHub,
}

/// The default config has a fresh hub that no subscriber feeds yet. Install
/// `config.hub.layer()` (or pass the hub to
/// [`init_telemetry`](crate::telemetry::init_telemetry)) for job `tracing`
/// output to reach the conveyer log.
impl Default for ConveyerConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            log_threshold: DEFAULT_THRESHOLD,
            drain_timeout: None,
            hub: LogHub::new(),
        }
    }
}

/// Lifecycle of a conveyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Running,
    Closed,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Lifecycle::Created => "created",
            Lifecycle::Running => "running",
            Lifecycle::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Snapshot of job tallies since the conveyer was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConveyerStats {
    pub submitted: u64,
    pub done: u64,
    pub failed: u64,
}

struct Counters {
    done: Counter<u64>,
    failed: Counter<u64>,
    submitted: Counter<u64>,
}

/// Job tallies, plus OTel counters once registered.
#[derive(Default)]
struct JobMetrics {
    counters: OnceLock<Counters>,
    submitted: AtomicU64,
    done: AtomicU64,
    failed: AtomicU64,
}

impl JobMetrics {
    fn submitted(&self) {
        if let Some(counters) = self.counters.get() {
            counters.submitted.add(1, &[]);
        }
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn done(&self) {
        if let Some(counters) = self.counters.get() {
            counters.done.add(1, &[]);
        }
        self.done.fetch_add(1, Ordering::Relaxed);
    }

    fn failed(&self, stage: &'static str) {
        if let Some(counters) = self.counters.get() {
            counters.failed.add(1, &[KeyValue::new("stage", stage)]);
        }
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ConveyerStats {
        ConveyerStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            done: self.done.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Everything a job task needs, shared between the dispatch thread and the
/// execution pool.
#[derive(Clone)]
struct Submitter {
    pool: Arc<ExecutionPool>,
    repo: Arc<dyn Repo>,
    users: Arc<dyn Users>,
    state: Arc<dyn State>,
    log: LogAggregator,
    metrics: Arc<JobMetrics>,
}

impl Submitter {
    /// Build the job for `work` and hand it to the pool without waiting.
    fn submit(&self, work: Work) {
        let scoped = ScopedState::for_work(Arc::clone(&self.state), &work);
        let job = Job {
            work,
            state: scoped,
            repo: Arc::clone(&self.repo),
            users: Arc::clone(&self.users),
            log: self.log.clone(),
            metrics: Arc::clone(&self.metrics),
        };
        let namespace = job.work.namespace();
        match self.pool.submit(job.run()) {
            Ok(()) => self.metrics.submitted(),
            Err(e) => error!(%namespace, error = %e, "work dropped"),
        }
    }
}

/// One submitted work item on its way through the pool.
struct Job {
    work: Work,
    state: ScopedState,
    repo: Arc<dyn Repo>,
    users: Arc<dyn Users>,
    log: LogAggregator,
    metrics: Arc<JobMetrics>,
}

impl Job {
    async fn run(self) {
        let span = start_job_span(&self.work);
        let outcome_span = span.clone();
        async move {
            let user = match self.users.fetch(&self.work.owner).await {
                Ok(user) => user,
                Err(e) => {
                    warn!(error = %e, "cannot resolve owner, job dropped");
                    record_job_outcome(&outcome_span, "unresolved");
                    self.metrics.failed("resolve");
                    return;
                }
            };

            let context = ExecutionContext::new(self.repo, user, self.log);
            match context.pulse(&self.work, &self.state).await {
                Ok(()) => {
                    record_job_outcome(&outcome_span, "done");
                    self.metrics.done();
                }
                Err(e) => {
                    warn!(error = %e, "pulse failed");
                    record_job_outcome(&outcome_span, "failed");
                    self.metrics.failed("pulse");
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Drains a queue and runs every work item concurrently.
pub struct Conveyer {
    queue: Arc<dyn Queue>,
    state: Arc<MemoryState>,
    log: LogAggregator,
    metrics: Arc<JobMetrics>,
    dispatch: DispatchLoop,
    pool: Arc<ExecutionPool>,
    submitter: Submitter,
    drain_timeout: Option<Duration>,
    lifecycle: Mutex<Lifecycle>,
}

impl Conveyer {
    /// Wire a conveyer up. Attaches `log` to the configured hub right away;
    /// nothing is pulled until [`start`](Self::start).
    pub fn new(
        queue: Arc<dyn Queue>,
        repo: Arc<dyn Repo>,
        users: Arc<dyn Users>,
        log: Arc<dyn Log>,
        config: ConveyerConfig,
    ) -> Result<Self> {
        let pool = Arc::new(ExecutionPool::new(&config.pool)?);
        let state = Arc::new(MemoryState::new());
        let log = LogAggregator::attach(&config.hub, log, config.log_threshold);
        let metrics = Arc::new(JobMetrics::default());

        let submitter = Submitter {
            pool: Arc::clone(&pool),
            repo,
            users,
            state: Arc::clone(&state) as Arc<dyn State>,
            log: log.clone(),
            metrics: Arc::clone(&metrics),
        };

        Ok(Self {
            queue,
            state,
            log,
            metrics,
            dispatch: DispatchLoop::new(),
            pool,
            submitter,
            drain_timeout: config.drain_timeout,
            lifecycle: Mutex::new(Lifecycle::Created),
        })
    }

    /// Start draining the queue.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidLifecycle`] unless the conveyer was just created.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lock_lifecycle();
        if *lifecycle != Lifecycle::Created {
            return Err(Error::InvalidLifecycle {
                from: lifecycle.to_string(),
                op: "start",
            });
        }

        let submitter = self.submitter.clone();
        self.dispatch
            .start(Arc::clone(&self.queue), move |work| submitter.submit(work))?;
        *lifecycle = Lifecycle::Running;
        info!(
            max_concurrent = self.pool.max_concurrent(),
            "conveyer started"
        );
        Ok(())
    }

    /// Detach the log, stop pulling, and wait for running jobs to finish.
    ///
    /// Blocks the calling thread until the pool has drained. Safe to call, or
    /// to drop the conveyer, inside a tokio runtime; the drain then runs on a
    /// separate thread.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidLifecycle`] if already closed.
    pub fn close(&self) -> Result<()> {
        let mut lifecycle = self.lock_lifecycle();
        if *lifecycle == Lifecycle::Closed {
            return Err(Error::InvalidLifecycle {
                from: lifecycle.to_string(),
                op: "close",
            });
        }
        *lifecycle = Lifecycle::Closed;
        drop(lifecycle);

        self.log.close();
        self.dispatch.stop();
        let drained = self.pool.shutdown(self.drain_timeout);

        let stats = self.stats();
        info!(
            submitted = stats.submitted,
            done = stats.done,
            failed = stats.failed,
            drained,
            "conveyer closed"
        );
        Ok(())
    }

    /// Bind the conveyer's job counters to `meter`.
    ///
    /// Jobs finishing before registration are not reported to the meter.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyRegistered`] on a second call, [`Error::InvalidLifecycle`]
    /// after close.
    pub fn register(&self, meter: &Meter) -> Result<()> {
        let lifecycle = *self.lock_lifecycle();
        if lifecycle == Lifecycle::Closed {
            return Err(Error::InvalidLifecycle {
                from: lifecycle.to_string(),
                op: "register",
            });
        }
        self.metrics
            .counters
            .set(Counters {
                done: metrics::done_jobs(meter),
                failed: metrics::failed_jobs(meter),
                submitted: metrics::submitted_jobs(meter),
            })
            .map_err(|_| Error::AlreadyRegistered)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lock_lifecycle()
    }

    /// Wait until every submitted job has finished, with the log still
    /// attached.
    ///
    /// Once ingestion has ended, awaiting this before [`close`](Self::close)
    /// lets every job's output reach the log.
    pub async fn idle(&self) {
        self.pool.idle().await
    }

    /// State of the dispatch loop; `Failed` once the queue has failed.
    pub fn status(&self) -> DispatchStatus {
        self.dispatch.status()
    }

    /// Watch the dispatch loop's status.
    pub fn subscribe(&self) -> watch::Receiver<DispatchStatus> {
        self.dispatch.subscribe()
    }

    pub fn stats(&self) -> ConveyerStats {
        self.metrics.snapshot()
    }

    /// Number of jobs submitted but not finished yet.
    pub fn pending(&self) -> usize {
        self.pool.pending()
    }

    /// The state shared by every job, keyed `owner/unit/key`.
    pub fn state(&self) -> &Arc<MemoryState> {
        &self.state
    }

    pub fn log(&self) -> &LogAggregator {
        &self.log
    }

    fn lock_lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Conveyer {
    fn drop(&mut self) {
        if self.lifecycle() != Lifecycle::Closed {
            let _ = self.close();
        }
    }
}

impl std::fmt::Debug for Conveyer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conveyer")
            .field("lifecycle", &self.lifecycle())
            .field("status", &self.status())
            .field("stats", &self.stats())
            .finish()
    }
}
