//! The root collection point for `tracing` output.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

use super::{JOB_SPAN, JobTag, Log, LogRecord};

/// Handle of one sink registered with a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkId(u64);

struct Sink {
    id: SinkId,
    threshold: Level,
    log: Arc<dyn Log>,
}

#[derive(Default)]
struct HubInner {
    sinks: RwLock<Vec<Sink>>,
    next_id: AtomicU64,
}

/// Fan-out point between `tracing` and the attached [`Log`] sinks.
///
/// Cloning is cheap; all clones share the same set of sinks. Install
/// [`LogHub::layer`] into the process subscriber once, then attach and detach
/// sinks at will.
#[derive(Clone, Default)]
pub struct LogHub {
    inner: Arc<HubInner>,
}

impl LogHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `tracing_subscriber` layer feeding this hub.
    pub fn layer(&self) -> HubLayer {
        HubLayer { hub: self.clone() }
    }

    /// Number of sinks currently attached.
    pub fn attached(&self) -> usize {
        self.inner
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn attach(&self, log: Arc<dyn Log>, threshold: Level) -> SinkId {
        let id = SinkId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Sink { id, threshold, log });
        id
    }

    /// Remove a sink. Once this returns, the sink receives no more records.
    pub(crate) fn detach(&self, id: SinkId) -> bool {
        let mut sinks = self
            .inner
            .sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = sinks.len();
        sinks.retain(|sink| sink.id != id);
        sinks.len() != before
    }

    fn publish(&self, record: &LogRecord) {
        let sinks = self
            .inner
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for sink in sinks.iter().filter(|s| record.level <= s.threshold) {
            sink.log.push(record.clone());
        }
    }
}

impl std::fmt::Debug for LogHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogHub")
            .field("attached", &self.attached())
            .finish()
    }
}

/// Layer forwarding every event to the hub's sinks as raw message text.
pub struct HubLayer {
    hub: LogHub,
}

impl<S> Layer<S> for HubLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if attrs.metadata().name() != JOB_SPAN {
            return;
        }
        let mut visitor = JobTagVisitor::default();
        attrs.record(&mut visitor);
        if let (Some(tag), Some(span)) = (visitor.finish(), ctx.span(id)) {
            span.extensions_mut().insert(tag);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        if self.hub.attached() == 0 {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let job = ctx.event_scope(event).and_then(|mut scope| {
            scope.find_map(|span| span.extensions().get::<JobTag>().cloned())
        });

        let metadata = event.metadata();
        self.hub.publish(&LogRecord {
            timestamp: Utc::now(),
            level: *metadata.level(),
            target: metadata.target().to_string(),
            message: visitor.message,
            job,
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

#[derive(Default)]
struct JobTagVisitor {
    work_id: Option<String>,
    owner: Option<String>,
    unit: Option<String>,
}

impl JobTagVisitor {
    fn set(&mut self, field: &Field, value: String) {
        match field.name() {
            "work.id" => self.work_id = Some(value),
            "owner" => self.owner = Some(value),
            "unit" => self.unit = Some(value),
            _ => {}
        }
    }

    fn finish(self) -> Option<JobTag> {
        Some(JobTag {
            work_id: self.work_id?,
            owner: self.owner?,
            unit: self.unit?,
        })
    }
}

impl Visit for JobTagVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.set(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.set(field, format!("{value:?}"));
    }
}
