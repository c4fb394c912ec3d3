//! Key/value state shared by jobs.
//!
//! [`MemoryState`] is the single store a conveyer shares across every job it
//! runs. Jobs never see it directly: each one gets a [`ScopedState`] that
//! confines its keys to the `owner/unit/` namespace of its work item.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::model::Work;

/// The state capability offered to running jobs.
pub trait State: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<String>;

    /// Does `key` hold a value?
    fn has(&self, key: &str) -> bool;

    /// Store `value` under `key` only if the key holds no value yet.
    ///
    /// Atomic with respect to every other call on the same store. Returns
    /// `true` when the write took effect, `false` (without side effect) when
    /// the key was already set.
    fn check_and_set(&self, key: &str, value: &str) -> bool;
}

// ---------------------------------------------------------------------------
// Global state
// ---------------------------------------------------------------------------

/// In-memory state living as long as the process.
#[derive(Debug, Default)]
pub struct MemoryState {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl State for MemoryState {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn has(&self, key: &str) -> bool {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    fn check_and_set(&self, key: &str, value: &str) -> bool {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        if values.contains_key(key) {
            return false;
        }
        values.insert(key.to_string(), value.to_string());
        true
    }
}

// ---------------------------------------------------------------------------
// Scoped view
// ---------------------------------------------------------------------------

/// A view of a backing [`State`] confined to one `owner/unit` namespace.
///
/// Holds no storage of its own: every call is forwarded to the backing store
/// with the key rewritten to `owner/unit/key`. Two views built for the same
/// work namespace share their keys; views for different namespaces never do.
///
/// A `/` or `%` inside the owner or the unit is percent-encoded in the prefix
/// (`a/b` becomes `a%2Fb`), so the separator only ever splits owner from unit.
#[derive(Clone)]
pub struct ScopedState {
    backing: Arc<dyn State>,
    prefix: String,
}

impl ScopedState {
    pub fn new(backing: Arc<dyn State>, owner: &str, unit: &str) -> Self {
        Self {
            backing,
            prefix: format!("{}/{}/", escape(owner), escape(unit)),
        }
    }

    /// The view for a work item's namespace.
    pub fn for_work(backing: Arc<dyn State>, work: &Work) -> Self {
        Self::new(backing, &work.owner, &work.unit)
    }

    /// The `owner/unit/` prefix prepended to every key.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

/// Percent-encode the characters that would make a prefix ambiguous.
fn escape(part: &str) -> Cow<'_, str> {
    if !part.contains(['/', '%']) {
        return Cow::Borrowed(part);
    }
    let mut escaped = String::with_capacity(part.len() + 4);
    for c in part.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '/' => escaped.push_str("%2F"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

impl std::fmt::Debug for ScopedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedState")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl State for ScopedState {
    fn get(&self, key: &str) -> Option<String> {
        self.backing.get(&self.prefixed(key))
    }

    fn has(&self, key: &str) -> bool {
        self.backing.has(&self.prefixed(key))
    }

    fn check_and_set(&self, key: &str, value: &str) -> bool {
        self.backing.check_and_set(&self.prefixed(key), value)
    }
}
