//! Execution context: what a job runs with once its owner is resolved.

use std::sync::Arc;
use std::time::Instant;

use tracing::{Level, debug};

use crate::error::Result;
use crate::log::{JobTag, LogAggregator, LogRecord};
use crate::model::{User, Work};
use crate::repo::Repo;
use crate::state::State;

/// Binds a job to its repo, resolved owner, and the conveyer's log.
pub struct ExecutionContext {
    repo: Arc<dyn Repo>,
    user: User,
    log: LogAggregator,
}

impl ExecutionContext {
    pub fn new(repo: Arc<dyn Repo>, user: User, log: LogAggregator) -> Self {
        Self { repo, user, log }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn log(&self) -> &LogAggregator {
        &self.log
    }

    /// Make the work's instance and run one pulse of it.
    ///
    /// Writes a summary record to the conveyer log either way; whatever the
    /// instance itself logs through `tracing` reaches the log via the hub.
    pub async fn pulse(&self, work: &Work, state: &dyn State) -> Result<()> {
        let started = Instant::now();
        let result = match self.repo.make(&self.user, work) {
            Ok(instance) => {
                debug!(user = %self.user.urn, "instance made");
                instance.pulse(work, state).await
            }
            Err(e) => Err(e),
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let record = match &result {
            Ok(()) => LogRecord::new(
                Level::INFO,
                module_path!(),
                format!("{} done in {duration_ms}ms", work.namespace()),
            ),
            Err(e) => LogRecord::new(
                Level::ERROR,
                module_path!(),
                format!("{} failed after {duration_ms}ms: {e}", work.namespace()),
            ),
        };
        self.log.push(record.job(JobTag {
            work_id: work.id.to_string(),
            owner: work.owner.clone(),
            unit: work.unit.clone(),
        }));

        result
    }
}
