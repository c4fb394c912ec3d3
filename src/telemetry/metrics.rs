//! Metric instrument factories for the conveyer.
//!
//! Instruments are built from whatever [`Meter`] the conveyer is registered
//! against, named `<component>.<label>`.

use opentelemetry::metrics::{Counter, Meter};

/// Component prefix of every conveyer instrument.
pub const COMPONENT: &str = "conveyer";

/// Stable instrument name for a fixed label, e.g. `conveyer.done-jobs`.
pub fn name(label: &str) -> String {
    format!("{COMPONENT}.{label}")
}

/// Returns the process-wide meter for conveyer instruments.
pub fn meter() -> Meter {
    opentelemetry::global::meter(COMPONENT)
}

/// Counter: jobs whose pulse completed without error.
pub fn done_jobs(meter: &Meter) -> Counter<u64> {
    meter
        .u64_counter(name("done-jobs"))
        .with_description("Number of jobs completed successfully")
        .build()
}

/// Counter: jobs that failed resolving their owner, building their instance,
/// or running.
/// Labels: `stage` ("resolve" | "pulse").
pub fn failed_jobs(meter: &Meter) -> Counter<u64> {
    meter
        .u64_counter(name("failed-jobs"))
        .with_description("Number of jobs that failed")
        .build()
}

/// Counter: jobs handed to the execution pool.
pub fn submitted_jobs(meter: &Meter) -> Counter<u64> {
    meter
        .u64_counter(name("submitted-jobs"))
        .with_description("Number of jobs submitted for execution")
        .build()
}
