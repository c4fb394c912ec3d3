//! Core data model.
//!
//! A work item names one schedulable job: who owns it, which unit of theirs it
//! runs, and the opaque spec the execution layer interprets. The conveyer never
//! looks inside the spec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Work
// ---------------------------------------------------------------------------

/// One schedulable job, as delivered by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Work {
    /// Unique identifier, assigned by whoever enqueued the work.
    #[serde(default)]
    pub id: WorkId,

    /// Identity of the user owning the unit (e.g., "urn:github:526301").
    pub owner: String,

    /// Name of the unit being run, unique per owner.
    pub unit: String,

    /// Arbitrary parameters for the execution layer. Opaque to the conveyer.
    #[serde(default)]
    pub spec: serde_json::Value,

    /// When the work was scheduled.
    #[serde(default = "Utc::now")]
    pub scheduled: DateTime<Utc>,
}

impl Work {
    pub fn new(owner: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            id: WorkId::new(),
            owner: owner.into(),
            unit: unit.into(),
            spec: serde_json::Value::Null,
            scheduled: Utc::now(),
        }
    }

    pub fn spec(mut self, spec: serde_json::Value) -> Self {
        self.spec = spec;
        self
    }

    /// The `owner/unit` namespace every job of this unit shares.
    pub fn namespace(&self) -> String {
        format!("{}/{}", self.owner, self.unit)
    }
}

/// Newtype for work item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkId(pub Uuid);

impl WorkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A resolved work owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub urn: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl User {
    pub fn new(urn: impl Into<String>) -> Self {
        Self {
            urn: urn.into(),
            name: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
