//! Failure Injection for Mock Workload
//!
//! Supports configurable failure injection for testing blocked and
//! deferred transitions.

use std::collections::HashMap;

use dpe_core::{WorkloadError, WorkloadOp};

/// How an injected failure surfaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Action fails outright
    Failed,
    /// Action is still running
    InProgress,
}

/// Failure configuration for an action
#[derive(Debug, Clone)]
pub struct FailureConfig {
    pub kind: FailureKind,
    pub message: String,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    /// Create a config that fails the action
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Failed,
            message: message.into(),
            fail_count: None,
        }
    }

    /// Create a config that reports the action as still in progress
    pub fn in_progress(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::InProgress,
            message: message.into(),
            fail_count: None,
        }
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }

    fn to_error(&self, op: WorkloadOp) -> WorkloadError {
        match self.kind {
            FailureKind::Failed => WorkloadError::failed(op, self.message.clone()),
            FailureKind::InProgress => WorkloadError::InProgress(self.message.clone()),
        }
    }
}

/// Failure injector for the mock workload
#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<WorkloadOp, FailureConfig>,
    call_counts: HashMap<WorkloadOp, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure for an action
    pub fn inject(&mut self, op: WorkloadOp, config: FailureConfig) {
        self.configs.insert(op, config);
        self.call_counts.insert(op, 0);
    }

    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    pub fn clear_op(&mut self, op: WorkloadOp) {
        self.configs.remove(&op);
        self.call_counts.remove(&op);
    }

    /// Check if a failure should occur for an action
    /// Returns the error to surface, None if the action should succeed
    pub fn check(&mut self, op: WorkloadOp) -> Option<WorkloadError> {
        let config = self.configs.get(&op)?;
        let count = self.call_counts.entry(op).or_insert(0);
        *count += 1;

        if let Some(fail_limit) = config.fail_count {
            if *count > fail_limit {
                return None;
            }
        }

        Some(config.to_error(op))
    }
}
