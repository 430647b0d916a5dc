//! Multi-unit lifecycle scenarios over a shared in-memory peer group.

use dpe_bench::workload::FailureConfig;
use dpe_bench::{
    AdvanceOutcome, InMemoryPeerStore, LifecycleManager, LifecycleState, LifecycleTransition,
    MockWorkload, PeerGroup, StatusKind, UnitId, WorkloadDriver, WorkloadOp,
};

use LifecycleState as S;
use LifecycleTransition as T;

type Unit = LifecycleManager<InMemoryPeerStore, MockWorkload>;

fn fleet(size: usize) -> (PeerGroup, Vec<Unit>) {
    let group = PeerGroup::new();
    let units = (0..size)
        .map(|i| LifecycleManager::new(group.join(format!("bench/{}", i)), MockWorkload::new()))
        .collect();
    (group, units)
}

fn committed(from: S, to: S) -> AdvanceOutcome {
    AdvanceOutcome::Committed { from, to }
}

// =============================================================================
// Happy path: one operator action on the leader carries the fleet
// =============================================================================

#[test]
fn test_prepare_run_stop_clean_across_fleet() {
    let (_group, mut units) = fleet(3);

    assert_eq!(units[0].advance(Some(T::Prepare)), committed(S::Unset, S::Preparing));
    assert_eq!(units[0].workload().calls(WorkloadOp::Prepare), 1);
    assert_eq!(units[0].advance(None), committed(S::Preparing, S::Available));

    // Followers see an available peer and need no operator action
    for unit in &mut units[1..] {
        assert_eq!(unit.advance(None), committed(S::Unset, S::Available));
        assert_eq!(unit.workload().calls(WorkloadOp::Prepare), 0);
    }

    assert_eq!(units[0].advance(Some(T::Run)), committed(S::Available, S::Running));
    for unit in &mut units[1..] {
        assert_eq!(unit.advance(None), committed(S::Available, S::Running));
        assert!(unit.workload().is_running());
    }

    assert_eq!(units[0].advance(Some(T::Stop)), committed(S::Running, S::Stopped));
    for unit in &mut units[1..] {
        assert_eq!(unit.advance(None), committed(S::Running, S::Stopped));
        assert!(unit.workload().is_stopped());
    }

    for unit in &mut units {
        assert_eq!(unit.advance(Some(T::Clean)), committed(S::Stopped, S::Unset));
        assert!(unit.workload().is_cleaned());
    }
}

#[test]
fn test_second_prepare_is_rejected_once_fleet_moved_on() {
    let (_group, mut units) = fleet(2);
    units[0].advance(Some(T::Prepare));
    units[0].advance(None);

    let outcome = units[1].advance(Some(T::Prepare));

    assert_eq!(
        outcome,
        AdvanceOutcome::Rejected {
            state: S::Unset,
            transition: T::Prepare
        }
    );
    assert_eq!(units[1].current(), S::Unset);
}

#[test]
fn test_late_joiner_follows_running_fleet() {
    let (group, mut units) = fleet(2);
    units[0].advance(Some(T::Prepare));
    units[0].advance(None);
    units[0].advance(Some(T::Run));

    let mut late = LifecycleManager::new(group.join("bench/9"), MockWorkload::new());

    assert_eq!(late.advance(None), committed(S::Unset, S::Running));
    assert_eq!(late.workload().calls(WorkloadOp::Start), 1);
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_failed_run_allows_fresh_prepare() {
    let (_group, mut units) = fleet(2);
    units[0].advance(Some(T::Prepare));
    units[0].advance(None);
    units[0].advance(Some(T::Run));
    units[1].advance(None);

    units[0].workload_mut().set_failed(true);
    assert_eq!(units[0].advance(None), committed(S::Running, S::Failed));
    assert_eq!(units[0].status().kind, StatusKind::Blocked);

    // A healthy follower is not dragged into FAILED
    assert_eq!(
        units[1].advance(None),
        AdvanceOutcome::Unchanged { state: S::Running }
    );

    assert_eq!(units[0].advance(Some(T::Prepare)), committed(S::Failed, S::Preparing));
}

#[test]
fn test_in_progress_prepare_is_deferred_then_retried() {
    let (_group, mut units) = fleet(1);
    units[0]
        .workload_mut()
        .inject(WorkloadOp::Prepare, FailureConfig::in_progress("loading").with_fail_count(1));

    let outcome = units[0].advance(Some(T::Prepare));
    assert!(matches!(
        outcome,
        AdvanceOutcome::Deferred {
            state: S::Unset,
            target: S::Preparing,
            ..
        }
    ));
    assert_eq!(units[0].current(), S::Unset);

    assert_eq!(units[0].advance(Some(T::Prepare)), committed(S::Unset, S::Preparing));
}

#[test]
fn test_failed_start_blocks_without_commit() {
    let (_group, mut units) = fleet(1);
    units[0].advance(Some(T::Prepare));
    units[0].advance(None);
    units[0]
        .workload_mut()
        .inject(WorkloadOp::Start, FailureConfig::failed("no such binary"));

    let outcome = units[0].advance(Some(T::Run));

    match outcome {
        AdvanceOutcome::Blocked {
            state,
            target,
            reason,
        } => {
            assert_eq!(state, S::Available);
            assert_eq!(target, S::Running);
            assert!(reason.contains("no such binary"));
        }
        other => panic!("expected blocked, got {:?}", other),
    }
    assert_eq!(units[0].current(), S::Available);
}

// =============================================================================
// Result phases
// =============================================================================

#[test]
fn test_collect_upload_finish() {
    let (_group, mut units) = fleet(1);
    let unit = &mut units[0];
    unit.advance(Some(T::Prepare));
    unit.advance(None);
    unit.advance(Some(T::Run));

    unit.workload_mut().set_collecting(true);
    assert_eq!(unit.advance(None), committed(S::Running, S::Collecting));

    unit.workload_mut().set_collecting(false);
    unit.workload_mut().set_uploading(true);
    assert_eq!(unit.advance(None), committed(S::Collecting, S::Uploading));

    unit.workload_mut().set_uploading(false);
    unit.workload_mut().set_stopped(true);
    assert_eq!(unit.advance(None), committed(S::Uploading, S::Finished));

    // A finished benchmark can be run again
    assert_eq!(unit.advance(Some(T::Run)), committed(S::Finished, S::Running));
}

// =============================================================================
// Membership
// =============================================================================

#[test]
fn test_membership_change_stops_running_benchmark() {
    let (group, mut units) = fleet(2);
    units[0].advance(Some(T::Prepare));
    units[0].advance(None);
    units[0].advance(Some(T::Run));

    group.join("bench/5");

    assert_eq!(units[0].on_membership_changed(), committed(S::Running, S::Stopped));
    assert!(units[0].workload().is_stopped());
}

#[test]
fn test_membership_change_before_run_is_ignored() {
    let (group, mut units) = fleet(2);
    units[0].advance(Some(T::Prepare));

    group.leave(&UnitId::new("bench/1"));

    assert_eq!(
        units[0].on_membership_changed(),
        AdvanceOutcome::Unchanged { state: S::Preparing }
    );
}

#[test]
fn test_departed_peer_no_longer_counts() {
    let (group, mut units) = fleet(2);
    group.force_state(&UnitId::new("bench/1"), S::Stopped);

    group.leave(&UnitId::new("bench/1"));

    assert_eq!(units[0].peer_view().aggregate(), S::Unset);
    assert_eq!(units[0].advance(Some(T::Prepare)), committed(S::Unset, S::Preparing));
}

// =============================================================================
// Concurrent prepare
// =============================================================================

#[test]
fn test_concurrent_prepare_never_errors() {
    let (group, units) = fleet(4);

    let handles: Vec<_> = units
        .into_iter()
        .map(|mut unit| std::thread::spawn(move || unit.advance(Some(T::Prepare))))
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners = outcomes
        .iter()
        .filter(|o| matches!(o, AdvanceOutcome::Committed { .. }))
        .count();
    assert!(winners >= 1);
    for outcome in &outcomes {
        assert!(matches!(
            outcome,
            AdvanceOutcome::Committed { .. } | AdvanceOutcome::Rejected { .. }
        ));
    }

    let preparing = group
        .snapshot()
        .into_iter()
        .filter(|record| record.state == S::Preparing)
        .count();
    assert_eq!(preparing, winners);
}
