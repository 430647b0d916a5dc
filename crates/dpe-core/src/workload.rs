//! Workload driver contract.
//!
//! A driver wraps one benchmarking tool. Predicates are side-effect free
//! reads (they may still perform I/O); actions are only invoked by the
//! lifecycle manager while applying a transition.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// Side-effecting workload action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadOp {
    Prepare,
    Start,
    Stop,
    Clean,
}

impl fmt::Display for WorkloadOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkloadOp::Prepare => "prepare",
            WorkloadOp::Start => "start",
            WorkloadOp::Stop => "stop",
            WorkloadOp::Clean => "clean",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by workload actions
#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    /// The action was accepted but has not completed yet. Callers should
    /// re-evaluate on the next event instead of waiting.
    #[error("still in progress: {0}")]
    InProgress(String),

    #[error("{op} failed: {message}")]
    Failed { op: WorkloadOp, message: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl WorkloadError {
    pub fn failed(op: WorkloadOp, message: impl Into<String>) -> Self {
        WorkloadError::Failed {
            op,
            message: message.into(),
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, WorkloadError::InProgress(_))
    }
}

/// Driver for one benchmarking tool.
pub trait WorkloadDriver {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Prepare phase completed successfully
    fn is_prepared(&self) -> bool;
    fn is_running(&self) -> bool;
    /// No workload process is alive
    fn is_stopped(&self) -> bool;
    fn is_failed(&self) -> bool;
    fn is_collecting(&self) -> bool;
    fn is_uploading(&self) -> bool;
    /// Nothing left behind by earlier prepare/run phases
    fn is_cleaned(&self) -> bool;

    /// Load the benchmark data set
    fn prepare(&mut self) -> Result<(), WorkloadError>;

    /// (Re)start the benchmark run
    fn start(&mut self) -> Result<(), WorkloadError>;

    fn stop(&mut self) -> Result<(), WorkloadError>;

    /// Remove everything the prepare and run phases produced
    fn clean(&mut self) -> Result<(), WorkloadError>;
}
