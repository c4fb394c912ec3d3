//! Log destinations and the bridge from `tracing` into them.
//!
//! A [`LogHub`] is the root collection point: a `tracing_subscriber` layer
//! installed once per process. A [`LogAggregator`] binds one [`Log`]
//! destination to a hub for the lifetime of one conveyer, so everything jobs
//! log through `tracing` also lands in that conveyer's log.

pub mod aggregator;
pub mod hub;

pub use aggregator::LogAggregator;
pub use hub::LogHub;

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::Level;

/// Name of the span every job runs inside. The hub reads the job's identity
/// from it to tag records.
pub const JOB_SPAN: &str = "conveyer.job";

/// Identity of the job a record was emitted from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTag {
    pub work_id: String,
    pub owner: String,
    pub unit: String,
}

/// One line of log output, as delivered to a [`Log`].
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub target: String,
    /// Raw message text, without level, target or fields.
    pub message: String,
    /// The job this record belongs to, if it was emitted inside one.
    pub job: Option<JobTag>,
}

impl LogRecord {
    pub fn new(level: Level, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            target: target.into(),
            message: message.into(),
            job: None,
        }
    }

    pub fn job(mut self, job: JobTag) -> Self {
        self.job = Some(job);
        self
    }
}

/// An append-only destination for log records.
pub trait Log: Send + Sync {
    fn push(&self, record: LogRecord);
}

/// A [`Log`] that keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryLog {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records pushed so far.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Just the message texts, in push order.
    pub fn lines(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.message).collect()
    }
}

impl Log for MemoryLog {
    fn push(&self, record: LogRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}
