//! Lifecycle manager
//!
//! Decides the next lifecycle state of this unit from its own record, the
//! peer aggregate, an optional operator transition and a readiness
//! snapshot of the workload, then applies the side effects needed to enter
//! that state before committing it.
//!
//! The PREPARE rule is first-writer-wins on a stale peer snapshot: two
//! units that both read an UNSET aggregate may both enter PREPARING. This
//! is accepted, not guarded by a lock.

use serde::Serialize;
use tracing::{debug, info, warn};

use dpe_core::{
    LifecycleState, LifecycleTransition, PeerStore, StoreError, WorkloadDriver, WorkloadError,
    WorkloadOp,
};

use super::peer::PeerView;
use super::readiness::Readiness;
use super::status::Status;

/// Why a transition could not be committed
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    /// The workload accepted the action but has not finished it yet
    #[error("{op} still in progress: {reason}")]
    Deferred { op: WorkloadOp, reason: String },

    #[error("workload {op} failed: {source}")]
    Workload {
        op: WorkloadOp,
        #[source]
        source: WorkloadError,
    },

    #[error("could not record state: {0}")]
    Store(#[from] StoreError),
}

/// Result of one `advance` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    /// Nothing to do from here
    Unchanged { state: LifecycleState },
    /// The requested transition is not valid right now
    Rejected {
        state: LifecycleState,
        transition: LifecycleTransition,
    },
    /// New state committed
    Committed {
        from: LifecycleState,
        to: LifecycleState,
    },
    /// A side effect is still running; re-evaluate on the next event
    Deferred {
        state: LifecycleState,
        target: LifecycleState,
        reason: String,
    },
    /// A side effect failed; state left unchanged
    Blocked {
        state: LifecycleState,
        target: LifecycleState,
        reason: String,
    },
}

impl AdvanceOutcome {
    /// State recorded for this unit once the call returned
    pub fn state(&self) -> LifecycleState {
        match self {
            AdvanceOutcome::Committed { to, .. } => *to,
            AdvanceOutcome::Unchanged { state }
            | AdvanceOutcome::Rejected { state, .. }
            | AdvanceOutcome::Deferred { state, .. }
            | AdvanceOutcome::Blocked { state, .. } => *state,
        }
    }
}

/// One decision with the rule that produced it
struct Decision {
    state: LifecycleState,
    rule: &'static str,
}

fn decide<W: WorkloadDriver + ?Sized>(
    current: LifecycleState,
    peers: LifecycleState,
    transition: Option<LifecycleTransition>,
    ready: &Readiness<'_, W>,
) -> Option<Decision> {
    use LifecycleState as S;
    use LifecycleTransition as T;

    let pick = |state, rule| Some(Decision { state, rule });

    if transition == Some(T::Clean) {
        return pick(S::Unset, "clean requested");
    }
    if transition == Some(T::Stop) {
        return pick(S::Stopped, "stop requested");
    }
    if peers == S::Stopped && current != S::Stopped {
        return pick(S::Stopped, "peer stopped");
    }
    if current.is_active_phase() && ready.failed() {
        return pick(S::Failed, "workload failed");
    }
    if transition == Some(T::Prepare) {
        return match peers {
            S::Unset | S::Failed => pick(S::Preparing, "prepare requested"),
            _ => None,
        };
    }
    if current == S::Preparing && ready.prepared() {
        return pick(S::Available, "workload prepared");
    }
    if transition.is_none() && peers == S::Available {
        return pick(S::Available, "peer available");
    }
    if transition == Some(T::Run)
        && matches!(current, S::Available | S::Failed | S::Stopped | S::Finished)
    {
        return pick(S::Running, "run requested");
    }
    if peers == S::Running && matches!(current, S::Unset | S::Available) {
        return pick(S::Running, "peer running");
    }
    if ready.collecting() {
        return pick(S::Collecting, "workload collecting");
    }
    if ready.uploading() {
        return pick(S::Uploading, "workload uploading");
    }
    if matches!(current, S::Running | S::Uploading) && ready.halted() {
        return pick(S::Finished, "workload halted");
    }
    None
}

/// Per-unit lifecycle state machine over a peer store and workload driver.
pub struct LifecycleManager<S, W> {
    store: S,
    workload: W,
}

impl<S: PeerStore, W: WorkloadDriver> LifecycleManager<S, W> {
    pub fn new(store: S, workload: W) -> Self {
        Self { store, workload }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn workload(&self) -> &W {
        &self.workload
    }

    pub fn workload_mut(&mut self) -> &mut W {
        &mut self.workload
    }

    /// This unit's last recorded state, `Unset` if none.
    pub fn current(&self) -> LifecycleState {
        match self.store.get_unit_state(self.store.this_unit()) {
            Ok(state) => state,
            Err(e) => {
                warn!(unit = %self.store.this_unit(), error = %e, "could not read own record");
                LifecycleState::Unset
            }
        }
    }

    pub fn peer_view(&self) -> PeerView {
        PeerView::collect(&self.store)
    }

    /// Compute the next state, `None` meaning "leave the state unchanged".
    pub fn next(&self, transition: Option<LifecycleTransition>) -> Option<LifecycleState> {
        let view = self.peer_view();
        let ready = Readiness::new(&self.workload);
        let current = view.own();
        let peers = view.aggregate();

        let decision = decide(current, peers, transition, &ready);
        match &decision {
            Some(d) => debug!(
                unit = %self.store.this_unit(),
                %current,
                %peers,
                transition = ?transition,
                next = %d.state,
                rule = d.rule,
                "lifecycle decision"
            ),
            None => debug!(
                unit = %self.store.this_unit(),
                %current,
                %peers,
                transition = ?transition,
                "no lifecycle transition"
            ),
        }
        decision.map(|d| d.state)
    }

    /// Apply side effects for `new_state` and commit it.
    ///
    /// Returns false without committing if a required side effect failed.
    pub fn make_transition(&mut self, new_state: LifecycleState) -> bool {
        match self.try_transition(new_state) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    unit = %self.store.this_unit(),
                    target = %new_state,
                    error = %e,
                    "transition not committed"
                );
                false
            }
        }
    }

    /// Like `make_transition`, reporting why a transition was blocked.
    pub fn try_transition(&mut self, new_state: LifecycleState) -> Result<(), TransitionError> {
        match new_state {
            LifecycleState::Unset => {
                self.ensure_stopped()?;
                if !self.workload.is_cleaned() {
                    self.run_op(WorkloadOp::Clean)?;
                }
            }
            LifecycleState::Preparing => {
                // A recorded failure means the old data set cannot be reused.
                if !self.workload.is_prepared() || self.workload.is_failed() {
                    self.run_op(WorkloadOp::Prepare)?;
                }
            }
            LifecycleState::Available => self.ensure_stopped()?,
            LifecycleState::Running => {
                if !self.workload.is_running() {
                    self.run_op(WorkloadOp::Start)?;
                }
            }
            LifecycleState::Failed => {
                // A failed process is already down; anything else must stop first.
                if !self.workload.is_failed() {
                    self.ensure_stopped()?;
                }
            }
            LifecycleState::Finished | LifecycleState::Stopped => self.ensure_stopped()?,
            LifecycleState::Collecting | LifecycleState::Uploading => {}
        }

        self.store.set_own_state(new_state)?;
        info!(unit = %self.store.this_unit(), state = %new_state, "lifecycle state committed");
        Ok(())
    }

    fn ensure_stopped(&mut self) -> Result<(), TransitionError> {
        if self.workload.is_stopped() {
            return Ok(());
        }
        self.run_op(WorkloadOp::Stop)
    }

    fn run_op(&mut self, op: WorkloadOp) -> Result<(), TransitionError> {
        debug!(workload = self.workload.name(), %op, "running workload action");
        let result = match op {
            WorkloadOp::Prepare => self.workload.prepare(),
            WorkloadOp::Start => self.workload.start(),
            WorkloadOp::Stop => self.workload.stop(),
            WorkloadOp::Clean => self.workload.clean(),
        };
        result.map_err(|e| match e {
            WorkloadError::InProgress(reason) => TransitionError::Deferred { op, reason },
            source => TransitionError::Workload { op, source },
        })
    }

    pub fn status(&self) -> Status {
        Status::for_state(self.current())
    }

    /// Re-evaluate this unit: decide, apply and commit in one step.
    ///
    /// `None` is a passive re-check triggered by any external event.
    pub fn advance(&mut self, transition: Option<LifecycleTransition>) -> AdvanceOutcome {
        let from = self.current();
        let to = match (self.next(transition), transition) {
            (Some(to), _) => to,
            (None, Some(transition)) => {
                return AdvanceOutcome::Rejected {
                    state: from,
                    transition,
                }
            }
            (None, None) => return AdvanceOutcome::Unchanged { state: from },
        };

        if transition.is_none() && to == from {
            return AdvanceOutcome::Unchanged { state: from };
        }

        match self.try_transition(to) {
            Ok(()) => AdvanceOutcome::Committed { from, to },
            Err(TransitionError::Deferred { op, reason }) => {
                info!(unit = %self.store.this_unit(), %op, %reason, "transition deferred");
                AdvanceOutcome::Deferred {
                    state: from,
                    target: to,
                    reason,
                }
            }
            Err(e) => {
                warn!(unit = %self.store.this_unit(), target = %to, error = %e, "transition blocked");
                AdvanceOutcome::Blocked {
                    state: from,
                    target: to,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// The peer set changed: a benchmark past AVAILABLE no longer matches
    /// the fleet it was started on, so it is stopped.
    pub fn on_membership_changed(&mut self) -> AdvanceOutcome {
        let current = self.current();
        if matches!(
            current,
            LifecycleState::Unset | LifecycleState::Preparing | LifecycleState::Available
        ) {
            return AdvanceOutcome::Unchanged { state: current };
        }
        info!(unit = %self.store.this_unit(), %current, "peer set changed, stopping benchmark");
        self.advance(Some(LifecycleTransition::Stop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PeerGroup;
    use crate::workload::{FailureConfig, Check, MockWorkload};

    use LifecycleState as S;
    use LifecycleTransition as T;

    fn manager_with(
        own: S,
        peers: &[S],
    ) -> LifecycleManager<crate::store::InMemoryPeerStore, MockWorkload> {
        let group = PeerGroup::new();
        let store = group.join("bench/0");
        store.set_own_state(own).unwrap();
        for (i, state) in peers.iter().enumerate() {
            let unit = format!("bench/{}", i + 1);
            group.join(unit.as_str()).set_own_state(*state).unwrap();
        }
        LifecycleManager::new(store, MockWorkload::new())
    }

    #[test]
    fn test_clean_always_resets() {
        for own in S::ALL {
            for peer in S::ALL {
                let m = manager_with(own, &[peer]);
                assert_eq!(m.next(Some(T::Clean)), Some(S::Unset), "{own}/{peer}");
            }
        }
    }

    #[test]
    fn test_stop_always_stops() {
        for own in S::ALL {
            let mut m = manager_with(own, &[S::Running]);
            m.workload_mut().set_failed(true);
            assert_eq!(m.next(Some(T::Stop)), Some(S::Stopped), "{own}");
        }
    }

    #[test]
    fn test_prepare_from_unset_with_no_peers() {
        let m = manager_with(S::Unset, &[]);
        assert_eq!(m.next(Some(T::Prepare)), Some(S::Preparing));
    }

    #[test]
    fn test_prepare_rejected_when_peer_ahead() {
        for peer in [S::Preparing, S::Available, S::Running, S::Finished] {
            let m = manager_with(S::Unset, &[peer]);
            assert_eq!(m.next(Some(T::Prepare)), None, "{peer}");
        }
    }

    #[test]
    fn test_prepare_allowed_after_failure() {
        let m = manager_with(S::Failed, &[S::Unset]);
        assert_eq!(m.next(Some(T::Prepare)), Some(S::Preparing));
    }

    #[test]
    fn test_preparing_to_available_when_prepared() {
        let mut m = manager_with(S::Preparing, &[]);
        m.workload_mut().set_prepared(true);
        assert_eq!(m.next(None), Some(S::Available));
    }

    #[test]
    fn test_preparing_stays_while_not_prepared() {
        let m = manager_with(S::Preparing, &[]);
        assert_eq!(m.next(None), None);
    }

    #[test]
    fn test_failure_preempts_forward_progress() {
        for own in [S::Preparing, S::Running, S::Collecting, S::Uploading] {
            let mut m = manager_with(own, &[S::Running]);
            m.workload_mut().set_prepared(true);
            m.workload_mut().set_collecting(true);
            m.workload_mut().set_failed(true);
            assert_eq!(m.next(None), Some(S::Failed), "{own}");
            assert_eq!(m.next(Some(T::Run)), Some(S::Failed), "{own}");
        }
    }

    #[test]
    fn test_failure_ignored_when_idle() {
        let mut m = manager_with(S::Available, &[]);
        m.workload_mut().set_failed(true);
        assert_eq!(m.next(None), Some(S::Available));
    }

    #[test]
    fn test_follow_peer_available() {
        let m = manager_with(S::Unset, &[S::Available]);
        assert_eq!(m.next(None), Some(S::Available));
    }

    #[test]
    fn test_run_from_allowed_states() {
        for own in [S::Available, S::Failed, S::Stopped, S::Finished] {
            let m = manager_with(own, &[]);
            assert_eq!(m.next(Some(T::Run)), Some(S::Running), "{own}");
        }
    }

    #[test]
    fn test_run_rejected_from_unset() {
        let m = manager_with(S::Unset, &[]);
        assert_eq!(m.next(Some(T::Run)), None);
    }

    #[test]
    fn test_follow_peer_running() {
        let m = manager_with(S::Available, &[S::Running]);
        assert_eq!(m.next(None), Some(S::Running));

        let m = manager_with(S::Unset, &[S::Running]);
        assert_eq!(m.next(None), Some(S::Running));
    }

    #[test]
    fn test_peer_stopped_converges() {
        let m = manager_with(S::Running, &[S::Stopped]);
        assert_eq!(m.next(None), Some(S::Stopped));
    }

    #[test]
    fn test_stopped_unit_is_not_dragged_by_itself() {
        let m = manager_with(S::Stopped, &[S::Stopped]);
        assert_eq!(m.next(None), None);
        assert_eq!(m.next(Some(T::Run)), Some(S::Running));
    }

    #[test]
    fn test_collecting_and_uploading() {
        let mut m = manager_with(S::Running, &[]);
        m.workload_mut().set_collecting(true);
        assert_eq!(m.next(None), Some(S::Collecting));

        let mut m = manager_with(S::Collecting, &[]);
        m.workload_mut().set_uploading(true);
        assert_eq!(m.next(None), Some(S::Uploading));
    }

    #[test]
    fn test_running_finishes_when_halted() {
        let mut m = manager_with(S::Running, &[]);
        m.workload_mut().set_stopped(true);
        assert_eq!(m.next(None), Some(S::Finished));

        let mut m = manager_with(S::Uploading, &[]);
        m.workload_mut().set_stopped(true);
        assert_eq!(m.next(None), Some(S::Finished));
    }

    #[test]
    fn test_running_stays_while_workload_runs() {
        let mut m = manager_with(S::Running, &[]);
        m.workload_mut().set_running(true);
        assert_eq!(m.next(None), None);
    }

    #[test]
    fn test_next_is_idempotent() {
        let mut m = manager_with(S::Preparing, &[S::Unset]);
        m.workload_mut().set_prepared(true);
        let first = m.next(None);
        for _ in 0..5 {
            assert_eq!(m.next(None), first);
        }
    }

    #[test]
    fn test_next_checks_each_predicate_at_most_once() {
        let mut m = manager_with(S::Running, &[]);
        m.workload_mut().set_stopped(true);
        assert_eq!(m.next(None), Some(S::Finished));

        let w = m.workload();
        for check in Check::ALL {
            assert!(w.check_calls(check) <= 1, "{check:?} checked {} times", w.check_calls(check));
        }
    }

    #[test]
    fn test_make_transition_running_starts_workload() {
        let mut m = manager_with(S::Available, &[]);
        assert!(m.make_transition(S::Running));
        assert_eq!(m.current(), S::Running);
        assert_eq!(m.workload().calls(WorkloadOp::Start), 1);
        assert!(m.workload().is_running());
    }

    #[test]
    fn test_make_transition_running_blocked_when_start_fails() {
        let mut m = manager_with(S::Available, &[]);
        m.workload_mut()
            .inject(WorkloadOp::Start, FailureConfig::failed("binary missing"));

        assert!(!m.make_transition(S::Running));
        assert_eq!(m.current(), S::Available);
    }

    #[test]
    fn test_make_transition_unset_stops_and_cleans() {
        let mut m = manager_with(S::Finished, &[]);
        m.workload_mut().set_running(true);
        m.workload_mut().set_cleaned(false);

        assert!(m.make_transition(S::Unset));

        assert_eq!(m.workload().calls(WorkloadOp::Stop), 1);
        assert_eq!(m.workload().calls(WorkloadOp::Clean), 1);
        assert_eq!(m.current(), S::Unset);
    }

    #[test]
    fn test_make_transition_unset_blocked_when_clean_fails() {
        let mut m = manager_with(S::Finished, &[]);
        m.workload_mut().set_cleaned(false);
        m.workload_mut()
            .inject(WorkloadOp::Clean, FailureConfig::failed("permission denied"));

        assert!(!m.make_transition(S::Unset));
        assert_eq!(m.current(), S::Finished);
    }

    #[test]
    fn test_make_transition_skips_satisfied_side_effects() {
        let mut m = manager_with(S::Running, &[]);
        m.workload_mut().set_stopped(true);

        assert!(m.make_transition(S::Finished));
        assert_eq!(m.workload().calls(WorkloadOp::Stop), 0);
    }

    #[test]
    fn test_make_transition_preparing_runs_prepare() {
        let mut m = manager_with(S::Unset, &[]);
        assert!(m.make_transition(S::Preparing));
        assert_eq!(m.workload().calls(WorkloadOp::Prepare), 1);
    }

    #[test]
    fn test_prepare_after_failure_reloads_data_set() {
        let mut m = manager_with(S::Failed, &[]);
        m.workload_mut().set_prepared(true);
        m.workload_mut().set_failed(true);

        assert_eq!(
            m.advance(Some(T::Prepare)),
            AdvanceOutcome::Committed {
                from: S::Failed,
                to: S::Preparing
            }
        );
        assert_eq!(m.workload().calls(WorkloadOp::Prepare), 1);
    }

    #[test]
    fn test_make_transition_failed_with_failed_workload() {
        let mut m = manager_with(S::Running, &[]);
        m.workload_mut().set_failed(true);
        m.workload_mut()
            .inject(WorkloadOp::Stop, FailureConfig::failed("unreachable"));

        assert!(m.make_transition(S::Failed));
        assert_eq!(m.workload().calls(WorkloadOp::Stop), 0);
    }

    #[test]
    fn test_try_transition_reports_deferral() {
        let mut m = manager_with(S::Running, &[]);
        m.workload_mut().set_running(true);
        m.workload_mut()
            .inject(WorkloadOp::Stop, FailureConfig::in_progress("draining"));

        let err = m.try_transition(S::Stopped).unwrap_err();
        assert!(matches!(err, TransitionError::Deferred { op: WorkloadOp::Stop, .. }));
        assert_eq!(m.current(), S::Running);
    }

    #[test]
    fn test_advance_outcomes() {
        let mut m = manager_with(S::Unset, &[]);
        assert_eq!(
            m.advance(Some(T::Run)),
            AdvanceOutcome::Rejected {
                state: S::Unset,
                transition: T::Run
            }
        );
        assert_eq!(m.advance(None), AdvanceOutcome::Unchanged { state: S::Unset });
        assert_eq!(
            m.advance(Some(T::Prepare)),
            AdvanceOutcome::Committed {
                from: S::Unset,
                to: S::Preparing
            }
        );
    }

    #[test]
    fn test_advance_passive_equal_state_is_unchanged() {
        let mut m = manager_with(S::Available, &[S::Available]);
        m.workload_mut().set_running(true);

        assert_eq!(m.advance(None), AdvanceOutcome::Unchanged { state: S::Available });
        assert_eq!(m.workload().calls(WorkloadOp::Stop), 0);
    }

    #[test]
    fn test_advance_blocked_and_deferred() {
        let mut m = manager_with(S::Available, &[]);
        m.workload_mut()
            .inject(WorkloadOp::Start, FailureConfig::failed("no such file"));
        match m.advance(Some(T::Run)) {
            AdvanceOutcome::Blocked { state, target, reason } => {
                assert_eq!(state, S::Available);
                assert_eq!(target, S::Running);
                assert!(reason.contains("no such file"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let mut m = manager_with(S::Running, &[]);
        m.workload_mut().set_running(true);
        m.workload_mut()
            .inject(WorkloadOp::Stop, FailureConfig::in_progress("grace period"));
        assert!(matches!(
            m.advance(Some(T::Stop)),
            AdvanceOutcome::Deferred { target: S::Stopped, .. }
        ));
    }

    #[test]
    fn test_membership_change_stops_running_benchmark() {
        let mut m = manager_with(S::Running, &[]);
        m.workload_mut().set_running(true);

        assert_eq!(
            m.on_membership_changed(),
            AdvanceOutcome::Committed {
                from: S::Running,
                to: S::Stopped
            }
        );
        assert!(m.workload().is_stopped());
    }

    #[test]
    fn test_membership_change_ignored_before_run() {
        for own in [S::Unset, S::Preparing, S::Available] {
            let mut m = manager_with(own, &[]);
            assert_eq!(m.on_membership_changed(), AdvanceOutcome::Unchanged { state: own });
        }
    }

    #[test]
    fn test_status_projection() {
        let m = manager_with(S::Running, &[]);
        assert_eq!(m.status(), Status::for_state(S::Running));
    }
}
