//! Repository of runnable instances.
//!
//! The conveyer treats the repo as opaque: it hands the resolved user and the
//! work item over and runs whatever [`Instance`] comes back.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{User, Work};
use crate::state::State;

/// Turns a work item into something that can run on behalf of a user.
pub trait Repo: Send + Sync {
    fn make(&self, user: &User, work: &Work) -> Result<Box<dyn Instance>>;
}

/// A runnable job. `pulse` performs one execution of the unit.
#[async_trait]
pub trait Instance: Send + Sync {
    async fn pulse(&self, work: &Work, state: &dyn State) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Command repo
// ---------------------------------------------------------------------------

/// Spec understood by [`CommandRepo`]: `{"command": "make test"}`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandSpec {
    pub command: String,
}

/// Repo whose instances run the work spec's `command` through `sh -c`.
///
/// Each line the command prints on stdout is logged at `info`, stderr at
/// `warn`. The exit code is recorded in state under `runs/<work id>`.
#[derive(Debug, Default, Clone)]
pub struct CommandRepo;

impl Repo for CommandRepo {
    fn make(&self, user: &User, work: &Work) -> Result<Box<dyn Instance>> {
        let spec: CommandSpec = serde_json::from_value(work.spec.clone())
            .map_err(|e| Error::Repo(format!("bad spec for {}: {e}", work.namespace())))?;
        Ok(Box::new(CommandInstance {
            spec,
            user: user.clone(),
        }))
    }
}

struct CommandInstance {
    spec: CommandSpec,
    user: User,
}

#[async_trait]
impl Instance for CommandInstance {
    async fn pulse(&self, work: &Work, state: &dyn State) -> Result<()> {
        debug!(command = %self.spec.command, "running command");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.spec.command)
            .env("CONVEYER_OWNER", &work.owner)
            .env("CONVEYER_UNIT", &work.unit)
            .env("CONVEYER_WORK_ID", work.id.0.to_string())
            .env("CONVEYER_USER", &self.user.urn)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let forward_stdout = async {
            if let Some(out) = stdout {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!("{line}");
                }
            }
        };
        let forward_stderr = async {
            if let Some(err) = stderr {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("{line}");
                }
            }
        };
        let (status, (), ()) = tokio::join!(child.wait(), forward_stdout, forward_stderr);
        let status = status?;

        let code = status.code().unwrap_or(-1);
        state.check_and_set(&format!("runs/{}", work.id.0), &code.to_string());

        if status.success() {
            Ok(())
        } else {
            Err(Error::Pulse(format!("command exited with status {code}")))
        }
    }
}
