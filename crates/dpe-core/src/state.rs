//! Lifecycle states and operator transitions.
//!
//! States are totally ordered by how far along a unit is:
//! UNSET < PREPARING < AVAILABLE < RUNNING < FAILED < COLLECTING
//! < UPLOADING < FINISHED < STOPPED

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Lifecycle state recorded by each unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Nothing prepared yet
    #[default]
    Unset,
    /// One unit is loading the benchmark data set
    Preparing,
    /// Data set is ready and the benchmark can be started
    Available,
    /// Benchmark is executing
    Running,
    /// Benchmark execution failed
    Failed,
    /// Benchmark is collecting results
    Collecting,
    /// Results are being uploaded
    Uploading,
    /// Benchmark ran to completion
    Finished,
    /// Benchmark was stopped by the operator
    Stopped,
}

impl LifecycleState {
    /// Every state, in ordinal order.
    pub const ALL: [LifecycleState; 9] = [
        LifecycleState::Unset,
        LifecycleState::Preparing,
        LifecycleState::Available,
        LifecycleState::Running,
        LifecycleState::Failed,
        LifecycleState::Collecting,
        LifecycleState::Uploading,
        LifecycleState::Finished,
        LifecycleState::Stopped,
    ];

    /// Position in the "furthest along" order.
    pub fn ordinal(self) -> u8 {
        match self {
            LifecycleState::Unset => 0,
            LifecycleState::Preparing => 1,
            LifecycleState::Available => 2,
            LifecycleState::Running => 3,
            LifecycleState::Failed => 4,
            LifecycleState::Collecting => 5,
            LifecycleState::Uploading => 6,
            LifecycleState::Finished => 7,
            LifecycleState::Stopped => 8,
        }
    }

    /// Difference of ordinals: positive when `a` is further along than `b`.
    pub fn compare(a: LifecycleState, b: LifecycleState) -> i32 {
        i32::from(a.ordinal()) - i32::from(b.ordinal())
    }

    /// Wire name of the state
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Unset => "unset",
            LifecycleState::Preparing => "preparing",
            LifecycleState::Available => "available",
            LifecycleState::Running => "running",
            LifecycleState::Failed => "failed",
            LifecycleState::Collecting => "collecting",
            LifecycleState::Uploading => "uploading",
            LifecycleState::Finished => "finished",
            LifecycleState::Stopped => "stopped",
        }
    }

    /// Decode a state written by a peer.
    ///
    /// Unknown or empty values decode as `Unset` so that a peer running a
    /// different version can never look "ahead" of everyone else.
    pub fn parse_lenient(value: &str) -> LifecycleState {
        value.parse().unwrap_or(LifecycleState::Unset)
    }

    /// States in which a failing workload pre-empts forward progress.
    pub fn is_active_phase(self) -> bool {
        matches!(
            self,
            LifecycleState::Preparing
                | LifecycleState::Running
                | LifecycleState::Collecting
                | LifecycleState::Uploading
        )
    }
}

impl PartialOrd for LifecycleState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LifecycleState {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ordinal().cmp(&other.ordinal())
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by the strict `FromStr` implementations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseStateError {
    kind: &'static str,
    value: String,
}

impl FromStr for LifecycleState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LifecycleState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ParseStateError {
                kind: "lifecycle state",
                value: s.to_string(),
            })
    }
}

/// Operator-initiated request. The manager decides the resulting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleTransition {
    Prepare,
    Run,
    Stop,
    Clean,
}

impl LifecycleTransition {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleTransition::Prepare => "prepare",
            LifecycleTransition::Run => "run",
            LifecycleTransition::Stop => "stop",
            LifecycleTransition::Clean => "clean",
        }
    }
}

impl fmt::Display for LifecycleTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleTransition {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prepare" => Ok(LifecycleTransition::Prepare),
            "run" => Ok(LifecycleTransition::Run),
            "stop" => Ok(LifecycleTransition::Stop),
            "clean" => Ok(LifecycleTransition::Clean),
            other => Err(ParseStateError {
                kind: "lifecycle transition",
                value: other.to_string(),
            }),
        }
    }
}
