//! Per-decision readiness snapshot
//!
//! Driver predicates may be I/O bound. A snapshot evaluates each predicate
//! lazily and caches the answer, so one decision pass never asks the
//! driver the same question twice.

use std::cell::Cell;

use dpe_core::WorkloadDriver;

/// Memoized view over a workload driver's predicates.
pub struct Readiness<'a, W: WorkloadDriver + ?Sized> {
    driver: &'a W,
    prepared: Cell<Option<bool>>,
    running: Cell<Option<bool>>,
    stopped: Cell<Option<bool>>,
    failed: Cell<Option<bool>>,
    collecting: Cell<Option<bool>>,
    uploading: Cell<Option<bool>>,
}

fn memo(slot: &Cell<Option<bool>>, check: impl FnOnce() -> bool) -> bool {
    match slot.get() {
        Some(value) => value,
        None => {
            let value = check();
            slot.set(Some(value));
            value
        }
    }
}

impl<'a, W: WorkloadDriver + ?Sized> Readiness<'a, W> {
    pub fn new(driver: &'a W) -> Self {
        Self {
            driver,
            prepared: Cell::new(None),
            running: Cell::new(None),
            stopped: Cell::new(None),
            failed: Cell::new(None),
            collecting: Cell::new(None),
            uploading: Cell::new(None),
        }
    }

    pub fn prepared(&self) -> bool {
        memo(&self.prepared, || self.driver.is_prepared())
    }

    pub fn running(&self) -> bool {
        memo(&self.running, || self.driver.is_running())
    }

    pub fn stopped(&self) -> bool {
        memo(&self.stopped, || self.driver.is_stopped())
    }

    pub fn failed(&self) -> bool {
        memo(&self.failed, || self.driver.is_failed())
    }

    pub fn collecting(&self) -> bool {
        memo(&self.collecting, || self.driver.is_collecting())
    }

    pub fn uploading(&self) -> bool {
        memo(&self.uploading, || self.driver.is_uploading())
    }

    /// Stopped without failing: the run ended on its own.
    pub fn halted(&self) -> bool {
        self.stopped() && !self.running() && !self.failed()
    }
}
