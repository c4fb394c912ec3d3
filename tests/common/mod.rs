//! Shared test doubles.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use conveyer::error::{Error, Result};
use conveyer::model::{User, Work};
use conveyer::repo::{Instance, Repo};
use conveyer::state::State;

/// Repo whose instances follow the work spec:
///
/// - `"sleep_ms": 50` waits before finishing,
/// - `"set": ["key", "value"]` calls `check_and_set` on the job's state,
/// - `"fail": true` makes the pulse fail,
/// - `"unmakeable": true` makes the repo refuse to build the instance.
#[derive(Default)]
pub struct ScriptRepo {
    pub pulses: Arc<AtomicUsize>,
}

impl Repo for ScriptRepo {
    fn make(&self, _user: &User, work: &Work) -> Result<Box<dyn Instance>> {
        if work.spec["unmakeable"].as_bool().unwrap_or(false) {
            return Err(Error::Repo(format!("no such unit {}", work.namespace())));
        }
        Ok(Box::new(ScriptInstance {
            pulses: Arc::clone(&self.pulses),
        }))
    }
}

struct ScriptInstance {
    pulses: Arc<AtomicUsize>,
}

#[async_trait]
impl Instance for ScriptInstance {
    async fn pulse(&self, work: &Work, state: &dyn State) -> Result<()> {
        self.pulses.fetch_add(1, Ordering::SeqCst);
        tracing::info!("pulse of {}", work.namespace());

        if let Some(ms) = work.spec["sleep_ms"].as_u64() {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if let Some([key, value]) = work.spec["set"].as_array().map(Vec::as_slice) {
            state.check_and_set(key.as_str().unwrap_or_default(), value.as_str().unwrap_or_default());
        }
        if work.spec["fail"].as_bool().unwrap_or(false) {
            return Err(Error::Pulse(format!("{} asked to fail", work.namespace())));
        }
        Ok(())
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
