//! Resolution of work owners into users.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::User;

/// Looks up the user owning a work item.
#[async_trait]
pub trait Users: Send + Sync {
    async fn fetch(&self, owner: &str) -> Result<User>;
}

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct UsersFile {
    #[serde(default, rename = "user")]
    users: Vec<User>,
    #[serde(default)]
    anonymous: bool,
}

/// A fixed table of users, indexed by URN.
#[derive(Debug, Default)]
pub struct MemoryUsers {
    users: HashMap<String, User>,
    anonymous: bool,
}

impl MemoryUsers {
    /// An empty table: every fetch fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table that resolves any owner, inventing a bare user for unknown URNs.
    pub fn anonymous() -> Self {
        Self {
            users: HashMap::new(),
            anonymous: true,
        }
    }

    pub fn with(mut self, user: User) -> Self {
        self.users.insert(user.urn.clone(), user);
        self
    }

    /// Load a table from a TOML file:
    ///
    /// ```toml
    /// anonymous = false
    ///
    /// [[user]]
    /// urn = "urn:github:526301"
    /// name = "yegor256"
    /// ```
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read users file {}: {e}", path.display()))
        })?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("bad users file {}: {e}", path.display())))
    }

    fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        let file: UsersFile = toml::from_str(content)?;
        Ok(Self {
            users: file
                .users
                .into_iter()
                .map(|user| (user.urn.clone(), user))
                .collect(),
            anonymous: file.anonymous,
        })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl std::str::FromStr for MemoryUsers {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).map_err(|e| Error::Config(format!("bad users table: {e}")))
    }
}

#[async_trait]
impl Users for MemoryUsers {
    async fn fetch(&self, owner: &str) -> Result<User> {
        match self.users.get(owner) {
            Some(user) => Ok(user.clone()),
            None if self.anonymous => Ok(User::new(owner)),
            None => Err(Error::UserNotFound(owner.to_string())),
        }
    }
}
