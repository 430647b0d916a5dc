//! Unit identities and the per-unit lifecycle record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::state::LifecycleState;

/// Process-wide sequence counter for ordering record writes
static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Get the next sequence number for ordering
pub fn next_seq() -> u64 {
    SEQUENCE_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Identity of one unit in the fleet (e.g. `bench/0`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe form of the id, used to name per-unit files.
    ///
    /// `/` becomes `-`. Underscore, dash and backslash are escaped with a
    /// leading `_`, so distinct ids never share a stem.
    pub fn file_stem(&self) -> String {
        let mut stem = String::with_capacity(self.0.len());
        for c in self.0.chars() {
            match c {
                '/' => stem.push('-'),
                '_' => stem.push_str("__"),
                '-' => stem.push_str("_-"),
                '\\' => stem.push_str("_b"),
                c => stem.push(c),
            }
        }
        stem
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for UnitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle record owned and written by exactly one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitLifecycleRecord {
    /// Owning unit
    pub unit: UnitId,

    /// Last committed state
    pub state: LifecycleState,

    /// When the state was last written
    pub updated_at: DateTime<Utc>,

    /// Monotonic sequence counter of the writer
    pub seq: u64,
}

impl UnitLifecycleRecord {
    pub fn new(unit: UnitId, state: LifecycleState) -> Self {
        Self {
            unit,
            state,
            updated_at: Utc::now(),
            seq: next_seq(),
        }
    }

    /// Replace the state, bumping timestamp and sequence.
    pub fn update(&mut self, state: LifecycleState) {
        self.state = state;
        self.updated_at = Utc::now();
        self.seq = next_seq();
    }
}
