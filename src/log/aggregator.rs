//! Per-conveyer binding of a log destination to the hub.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::Level;

use super::hub::{LogHub, SinkId};
use super::{Log, LogRecord};

/// Default minimum verbosity a conveyer's log receives.
pub const DEFAULT_THRESHOLD: Level = Level::DEBUG;

struct Inner {
    hub: LogHub,
    log: Arc<dyn Log>,
    threshold: Level,
    /// `Some` while attached to the hub.
    sink: RwLock<Option<SinkId>>,
}

/// One conveyer's log destination, attached to the process log hub.
///
/// Clones share the attachment; the conveyer hands clones to every execution
/// context and closes its own handle on shutdown.
#[derive(Clone)]
pub struct LogAggregator {
    inner: Arc<Inner>,
}

impl LogAggregator {
    /// Attach `log` to `hub`, receiving every record at `threshold` or more severe.
    pub fn attach(hub: &LogHub, log: Arc<dyn Log>, threshold: Level) -> Self {
        tracing::debug!(%threshold, "attaching log aggregator");
        let sink = hub.attach(Arc::clone(&log), threshold);
        Self {
            inner: Arc::new(Inner {
                hub: hub.clone(),
                log,
                threshold,
                sink: RwLock::new(Some(sink)),
            }),
        }
    }

    pub fn threshold(&self) -> Level {
        self.inner.threshold
    }

    pub fn is_attached(&self) -> bool {
        self.inner
            .sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Write a record straight to the destination, bypassing `tracing`.
    ///
    /// Dropped once the aggregator is closed or when below the threshold.
    pub fn push(&self, record: LogRecord) {
        let sink = self
            .inner
            .sink
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if sink.is_some() && record.level <= self.inner.threshold {
            self.inner.log.push(record);
        }
    }

    /// Detach from the hub. After this returns the destination receives nothing.
    pub fn close(&self) {
        let mut sink = self
            .inner
            .sink
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = sink.take() {
            self.inner.hub.detach(id);
        }
    }
}

impl std::fmt::Debug for LogAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogAggregator")
            .field("threshold", &self.inner.threshold)
            .field("attached", &self.is_attached())
            .finish()
    }
}
