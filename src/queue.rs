//! Work queues the conveyer drains.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::model::Work;

/// A source of work items.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Wait for the next work item.
    ///
    /// An error is fatal to whoever is draining the queue.
    async fn pull(&self) -> Result<Work>;
}

// ---------------------------------------------------------------------------
// In-memory queue
// ---------------------------------------------------------------------------

enum Entry {
    Work(Work),
    Failure(String),
}

#[derive(Default)]
struct Pending {
    entries: VecDeque<Entry>,
    closed: bool,
}

/// FIFO queue held in memory.
///
/// After [`close`](MemoryQueue::close), remaining items still drain and then
/// `pull` fails with [`Error::QueueClosed`]. [`fail`](MemoryQueue::fail)
/// enqueues a failure: the pull that reaches it fails instead of yielding work.
#[derive(Default)]
pub struct MemoryQueue {
    pending: Mutex<Pending>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, work: Work) {
        self.lock().entries.push_back(Entry::Work(work));
        self.notify.notify_waiters();
    }

    /// Stop accepting pulls once the remaining items are gone.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Make the pull reaching this point of the queue fail with `reason`.
    pub fn fail(&self, reason: impl Into<String>) {
        self.lock().entries.push_back(Entry::Failure(reason.into()));
        self.notify.notify_waiters();
    }

    /// Number of work items waiting to be pulled.
    pub fn len(&self) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|entry| matches!(entry, Entry::Work(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn pull(&self) -> Result<Work> {
        loop {
            // Register interest before checking, so a push between the check
            // and the await is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut pending = self.lock();
                match pending.entries.pop_front() {
                    Some(Entry::Work(work)) => return Ok(work),
                    Some(Entry::Failure(reason)) => return Err(Error::Queue(reason)),
                    None if pending.closed => return Err(Error::QueueClosed),
                    None => {}
                }
            }

            notified.await;
        }
    }
}

// ---------------------------------------------------------------------------
// JSON lines
// ---------------------------------------------------------------------------

/// Queue reading one JSON-encoded [`Work`] per line from a reader.
///
/// Blank lines are skipped. End of input closes the queue; a malformed line
/// fails the pull.
pub struct JsonLinesQueue<R> {
    lines: tokio::sync::Mutex<Lines<R>>,
}

impl<R> JsonLinesQueue<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: tokio::sync::Mutex::new(reader.lines()),
        }
    }
}

#[async_trait]
impl<R> Queue for JsonLinesQueue<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn pull(&self) -> Result<Work> {
        let mut lines = self.lines.lock().await;
        loop {
            let Some(line) = lines.next_line().await? else {
                return Err(Error::QueueClosed);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return Ok(serde_json::from_str(line)?);
        }
    }
}
