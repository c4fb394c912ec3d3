//! Job execution span helpers.
//!
//! Every job runs inside a [`JOB_SPAN`] span; the log hub reads the job's
//! identity from its fields to tag records.

use tracing::Span;

use crate::log::JOB_SPAN;
use crate::model::Work;

/// Start the span a job executes in.
///
/// The `job.outcome` field is declared empty and filled by
/// [`record_job_outcome`].
pub fn start_job_span(work: &Work) -> Span {
    tracing::info_span!(
        JOB_SPAN,
        "work.id" = %work.id,
        owner = %work.owner,
        unit = %work.unit,
        "job.outcome" = tracing::field::Empty,
    )
}

/// Record how a job ended on its span.
pub fn record_job_outcome(span: &Span, outcome: &str) {
    span.record("job.outcome", outcome);
}
