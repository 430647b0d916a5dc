//! Mock Workload Implementation
//!
//! Flag-driven workload driver. Actions flip the flags the way a real tool
//! would (prepare marks the data set ready, start marks it running, ...);
//! tests can also set any flag directly and inject action failures.

use std::cell::RefCell;
use std::collections::HashMap;

use dpe_core::{WorkloadDriver, WorkloadError, WorkloadOp};

use super::failure::{FailureConfig, FailureInjector};

/// Readiness predicate, for call accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Check {
    Prepared,
    Running,
    Stopped,
    Failed,
    Collecting,
    Uploading,
    Cleaned,
}

impl Check {
    pub const ALL: [Check; 7] = [
        Check::Prepared,
        Check::Running,
        Check::Stopped,
        Check::Failed,
        Check::Collecting,
        Check::Uploading,
        Check::Cleaned,
    ];
}

#[derive(Debug, Clone)]
struct Flags {
    prepared: bool,
    running: bool,
    stopped: bool,
    failed: bool,
    collecting: bool,
    uploading: bool,
    cleaned: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            prepared: false,
            running: false,
            stopped: true,
            failed: false,
            collecting: false,
            uploading: false,
            cleaned: true,
        }
    }
}

/// In-process workload double
#[derive(Debug, Default)]
pub struct MockWorkload {
    flags: Flags,
    failures: FailureInjector,
    calls: HashMap<WorkloadOp, u32>,
    checks: RefCell<HashMap<Check, u32>>,
}

impl MockWorkload {
    /// Fresh workload: nothing prepared, nothing running
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_prepared(&mut self, value: bool) {
        self.flags.prepared = value;
        if value {
            self.flags.cleaned = false;
        }
    }

    /// Also flips `stopped` to the opposite value
    pub fn set_running(&mut self, value: bool) {
        self.flags.running = value;
        self.flags.stopped = !value;
    }

    /// Stopping also clears `running`
    pub fn set_stopped(&mut self, value: bool) {
        self.flags.stopped = value;
        if value {
            self.flags.running = false;
        }
    }

    pub fn set_failed(&mut self, value: bool) {
        self.flags.failed = value;
    }

    pub fn set_collecting(&mut self, value: bool) {
        self.flags.collecting = value;
    }

    pub fn set_uploading(&mut self, value: bool) {
        self.flags.uploading = value;
    }

    pub fn set_cleaned(&mut self, value: bool) {
        self.flags.cleaned = value;
    }

    /// Inject a failure for an action
    pub fn inject(&mut self, op: WorkloadOp, config: FailureConfig) {
        self.failures.inject(op, config);
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    /// Number of times an action was invoked (including failed attempts)
    pub fn calls(&self, op: WorkloadOp) -> u32 {
        self.calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of times a predicate was queried
    pub fn check_calls(&self, check: Check) -> u32 {
        self.checks.borrow().get(&check).copied().unwrap_or(0)
    }

    pub fn reset_check_calls(&self) {
        self.checks.borrow_mut().clear();
    }

    fn check(&self, check: Check, value: bool) -> bool {
        *self.checks.borrow_mut().entry(check).or_insert(0) += 1;
        value
    }

    fn begin(&mut self, op: WorkloadOp) -> Result<(), WorkloadError> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.failures.check(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl WorkloadDriver for MockWorkload {
    fn name(&self) -> &str {
        "mock"
    }

    fn is_prepared(&self) -> bool {
        self.check(Check::Prepared, self.flags.prepared)
    }

    fn is_running(&self) -> bool {
        self.check(Check::Running, self.flags.running)
    }

    fn is_stopped(&self) -> bool {
        self.check(Check::Stopped, self.flags.stopped)
    }

    fn is_failed(&self) -> bool {
        self.check(Check::Failed, self.flags.failed)
    }

    fn is_collecting(&self) -> bool {
        self.check(Check::Collecting, self.flags.collecting)
    }

    fn is_uploading(&self) -> bool {
        self.check(Check::Uploading, self.flags.uploading)
    }

    fn is_cleaned(&self) -> bool {
        self.check(Check::Cleaned, self.flags.cleaned)
    }

    fn prepare(&mut self) -> Result<(), WorkloadError> {
        self.begin(WorkloadOp::Prepare)?;
        self.flags.prepared = true;
        self.flags.failed = false;
        self.flags.cleaned = false;
        Ok(())
    }

    fn start(&mut self) -> Result<(), WorkloadError> {
        self.begin(WorkloadOp::Start)?;
        self.flags.running = true;
        self.flags.stopped = false;
        self.flags.failed = false;
        self.flags.cleaned = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), WorkloadError> {
        self.begin(WorkloadOp::Stop)?;
        self.flags.running = false;
        self.flags.stopped = true;
        self.flags.collecting = false;
        self.flags.uploading = false;
        Ok(())
    }

    fn clean(&mut self) -> Result<(), WorkloadError> {
        self.begin(WorkloadOp::Clean)?;
        self.flags = Flags::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_workload_is_stopped_and_clean() {
        let w = MockWorkload::new();
        assert!(w.is_stopped());
        assert!(w.is_cleaned());
        assert!(!w.is_prepared());
        assert!(!w.is_running());
    }

    #[test]
    fn test_actions_flip_flags() {
        let mut w = MockWorkload::new();
        w.prepare().unwrap();
        assert!(w.is_prepared());
        assert!(!w.is_cleaned());

        w.start().unwrap();
        assert!(w.is_running());
        assert!(!w.is_stopped());

        w.stop().unwrap();
        assert!(w.is_stopped());
        assert!(w.is_prepared());

        w.clean().unwrap();
        assert!(w.is_cleaned());
        assert!(!w.is_prepared());
    }

    #[test]
    fn test_injected_failure_leaves_flags() {
        let mut w = MockWorkload::new();
        w.inject(WorkloadOp::Start, FailureConfig::failed("boom").with_fail_count(1));

        assert!(w.start().is_err());
        assert!(!w.is_running());
        assert!(w.start().is_ok());
        assert!(w.is_running());
        assert_eq!(w.calls(WorkloadOp::Start), 2);
    }

    #[test]
    fn test_check_accounting() {
        let w = MockWorkload::new();
        w.is_failed();
        w.is_failed();
        assert_eq!(w.check_calls(Check::Failed), 2);
        w.reset_check_calls();
        assert_eq!(w.check_calls(Check::Failed), 0);
    }
}
