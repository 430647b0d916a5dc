//! Human-facing status projection of a lifecycle state.

use serde::{Deserialize, Serialize};
use std::fmt;

use dpe_core::LifecycleState;

/// Coarse status category shown to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Waiting,
    Maintenance,
    Active,
    Blocked,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusKind::Waiting => "waiting",
            StatusKind::Maintenance => "maintenance",
            StatusKind::Active => "active",
            StatusKind::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Status kind plus message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub kind: StatusKind,
    pub message: String,
}

impl Status {
    fn new(kind: StatusKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_string(),
        }
    }

    pub fn for_state(state: LifecycleState) -> Self {
        match state {
            LifecycleState::Unset => Status::new(StatusKind::Waiting, "Benchmark is unset"),
            LifecycleState::Preparing => {
                Status::new(StatusKind::Maintenance, "Preparing the benchmark")
            }
            LifecycleState::Available => {
                Status::new(StatusKind::Waiting, "Benchmark prepared: call run to start")
            }
            LifecycleState::Running => Status::new(StatusKind::Active, "Benchmark is running"),
            LifecycleState::Failed => Status::new(StatusKind::Blocked, "Benchmark failed execution"),
            LifecycleState::Collecting => {
                Status::new(StatusKind::Active, "Benchmark is collecting data")
            }
            LifecycleState::Uploading => {
                Status::new(StatusKind::Active, "Benchmark is uploading data")
            }
            LifecycleState::Finished => Status::new(StatusKind::Active, "Benchmark finished"),
            LifecycleState::Stopped => Status::new(StatusKind::Waiting, "Benchmark is stopped"),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
