//! DPE Bench Worker
//!
//! Runs a benchmarking tool's prepare/run/clean shell commands as detached
//! process groups and exposes them through the `WorkloadDriver` contract.
//! All state lives in the unit's workload directory, so successive CLI
//! invocations observe the same workload.

#[cfg(unix)]
mod command;
mod error;

#[cfg(unix)]
pub use command::{CommandWorkload, Phase, WorkloadSpec};
pub use error::WorkerError;
