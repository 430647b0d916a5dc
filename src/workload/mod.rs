//! Workload drivers bundled with the crate
//!
//! The process-backed driver lives in the `dpe-worker` crate; this module
//! holds the in-process mock used by tests and dry runs.

mod failure;
mod mock;

pub use failure::{FailureConfig, FailureInjector, FailureKind};
pub use mock::{MockWorkload, Check};
