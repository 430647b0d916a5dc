//! Worker error types

use std::io;
use std::path::PathBuf;

use dpe_core::{WorkloadError, WorkloadOp};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to spawn {phase} command: {source}")]
    Spawn {
        phase: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("clean command exited with {0}")]
    CleanFailed(String),

    #[error("corrupt pid file {}", .0.display())]
    BadPidFile(PathBuf),

    #[error("process group {pid} still alive after SIGKILL")]
    StillAlive { pid: i32 },
}

impl WorkerError {
    /// Map into the driver contract, attributing the failure to `op`.
    pub fn into_workload_error(self, op: WorkloadOp) -> WorkloadError {
        match self {
            WorkerError::StillAlive { pid } => {
                WorkloadError::InProgress(format!("process group {} still terminating", pid))
            }
            WorkerError::Io(e) => WorkloadError::Io(e),
            other => WorkloadError::failed(op, other.to_string()),
        }
    }
}
