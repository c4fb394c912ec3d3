//! Dispatch loop: drains the queue on one dedicated thread.
//!
//! Each pulled work item is handed to a submit callback and the loop goes
//! straight back to the queue, so ingestion never waits on execution. The
//! loop ends either when stopped or when the queue fails; both outcomes are
//! published as a [`DispatchStatus`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::model::Work;
use crate::queue::Queue;

/// Where the dispatch loop is in its life.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStatus {
    /// Not started yet.
    Idle,
    /// Pulling from the queue.
    Running,
    /// Stopped on request. Terminal.
    Stopped,
    /// The queue failed; no more work is picked up. Terminal.
    Failed(String),
}

impl DispatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchStatus::Stopped | DispatchStatus::Failed(_))
    }
}

impl std::fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchStatus::Idle => write!(f, "idle"),
            DispatchStatus::Running => write!(f, "running"),
            DispatchStatus::Stopped => write!(f, "stopped"),
            DispatchStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// The single-threaded pull/submit loop.
pub struct DispatchLoop {
    status: Arc<watch::Sender<DispatchStatus>>,
    cancel: CancellationToken,
    thread: Mutex<Option<JoinHandle<()>>>,
    pulled: Arc<AtomicU64>,
}

impl Default for DispatchLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchLoop {
    pub fn new() -> Self {
        let (status, _) = watch::channel(DispatchStatus::Idle);
        Self {
            status: Arc::new(status),
            cancel: CancellationToken::new(),
            thread: Mutex::new(None),
            pulled: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start pulling from `queue` on a dedicated thread, passing every item
    /// to `submit` in delivery order.
    ///
    /// # Errors
    ///
    /// Fails if the loop was started before or the thread cannot be spawned.
    pub fn start<F>(&self, queue: Arc<dyn Queue>, submit: F) -> Result<()>
    where
        F: FnMut(Work) + Send + 'static,
    {
        let mut thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if thread.is_some() || *self.status.borrow() != DispatchStatus::Idle {
            return Err(Error::Other("dispatch loop already started".to_string()));
        }

        let status = Arc::clone(&self.status);
        let cancel = self.cancel.clone();
        let pulled = Arc::clone(&self.pulled);
        status.send_replace(DispatchStatus::Running);

        let spawned = std::thread::Builder::new()
            .name("conveyer-dispatch".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!(error = %e, "cannot build dispatch runtime");
                        status.send_replace(DispatchStatus::Failed(e.to_string()));
                        return;
                    }
                };
                let outcome = runtime.block_on(run(queue, submit, cancel, pulled));
                status.send_replace(outcome);
            });

        match spawned {
            Ok(handle) => {
                *thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.status
                    .send_replace(DispatchStatus::Failed(e.to_string()));
                Err(e.into())
            }
        }
    }

    pub fn status(&self) -> DispatchStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes, e.g. to react to an ingestion failure.
    pub fn subscribe(&self) -> watch::Receiver<DispatchStatus> {
        self.status.subscribe()
    }

    /// Number of work items pulled from the queue so far.
    pub fn pulled(&self) -> u64 {
        self.pulled.load(Ordering::Relaxed)
    }

    /// Stop the loop and wait for its thread to exit.
    ///
    /// A pending pull is abandoned. Once this returns the queue is not pulled
    /// again.
    pub fn stop(&self) {
        self.cancel.cancel();
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("dispatch thread panicked");
                self.status
                    .send_replace(DispatchStatus::Failed("dispatch thread panicked".to_string()));
            }
        } else if !self.status.borrow().is_terminal() {
            self.status.send_replace(DispatchStatus::Stopped);
        }
    }
}

impl std::fmt::Debug for DispatchLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchLoop")
            .field("status", &self.status())
            .field("pulled", &self.pulled())
            .finish()
    }
}

async fn run<F>(
    queue: Arc<dyn Queue>,
    mut submit: F,
    cancel: CancellationToken,
    pulled: Arc<AtomicU64>,
) -> DispatchStatus
where
    F: FnMut(Work),
{
    info!("dispatch loop started");
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("dispatch loop stopped");
                return DispatchStatus::Stopped;
            }
            next = queue.pull() => next,
        };

        match next {
            Ok(work) => {
                pulled.fetch_add(1, Ordering::Relaxed);
                debug!(work.id = %work.id, owner = %work.owner, unit = %work.unit, "work pulled");
                submit(work);
            }
            Err(e) => {
                error!(error = %e, "queue pull failed, dispatch loop stopped");
                return DispatchStatus::Failed(e.to_string());
            }
        }
    }
}
