//! Peer aggregation
//!
//! Computes how far along the fleet is: the maximum lifecycle state over
//! this unit's record and every peer record the store knows about.

use serde::Serialize;
use tracing::warn;

use dpe_core::{LifecycleState, PeerStore, UnitId};

/// One unit's contribution to a peer view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerEntry {
    pub unit: UnitId,
    pub state: LifecycleState,
    /// False when the unit never wrote a record (counted as `Unset`)
    pub recorded: bool,
}

/// Snapshot of this unit's state and all peer states.
#[derive(Debug, Clone, Serialize)]
pub struct PeerView {
    own: PeerEntry,
    peers: Vec<PeerEntry>,
}

fn read_entry<S: PeerStore + ?Sized>(store: &S, unit: &UnitId) -> PeerEntry {
    match store.unit_record(unit) {
        Ok(Some(record)) => PeerEntry {
            unit: unit.clone(),
            state: record.state,
            recorded: true,
        },
        Ok(None) => PeerEntry {
            unit: unit.clone(),
            state: LifecycleState::Unset,
            recorded: false,
        },
        Err(e) => {
            warn!(unit = %unit, error = %e, "unreadable peer record, counting as unset");
            PeerEntry {
                unit: unit.clone(),
                state: LifecycleState::Unset,
                recorded: false,
            }
        }
    }
}

impl PeerView {
    /// Read own and peer records from the store.
    ///
    /// Never fails: an unreachable peer listing yields a view with no peers.
    pub fn collect<S: PeerStore + ?Sized>(store: &S) -> Self {
        let own = read_entry(store, store.this_unit());
        let peer_ids = match store.list_peer_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "could not list peers, assuming none");
                Default::default()
            }
        };
        let peers = peer_ids
            .iter()
            .map(|unit| read_entry(store, unit))
            .collect();
        Self { own, peers }
    }

    /// Build a view from already-known states.
    pub fn from_states(
        own: (UnitId, LifecycleState),
        peers: impl IntoIterator<Item = (UnitId, LifecycleState)>,
    ) -> Self {
        let entry = |(unit, state)| PeerEntry {
            unit,
            state,
            recorded: true,
        };
        Self {
            own: entry(own),
            peers: peers.into_iter().map(entry).collect(),
        }
    }

    pub fn own(&self) -> LifecycleState {
        self.own.state
    }

    pub fn own_entry(&self) -> &PeerEntry {
        &self.own
    }

    pub fn peers(&self) -> &[PeerEntry] {
        &self.peers
    }

    /// Most advanced state among this unit and its peers.
    pub fn aggregate(&self) -> LifecycleState {
        self.peers
            .iter()
            .map(|entry| entry.state)
            .fold(self.own.state, |acc, state| {
                if LifecycleState::compare(state, acc) > 0 {
                    state
                } else {
                    acc
                }
            })
    }

    /// The furthest peer strictly ahead of this unit, `None` on ties.
    pub fn ahead(&self) -> Option<(&UnitId, LifecycleState)> {
        let mut best: Option<&PeerEntry> = None;
        for entry in &self.peers {
            let reference = best.map(|b| b.state).unwrap_or(self.own.state);
            if LifecycleState::compare(entry.state, reference) > 0 {
                best = Some(entry);
            }
        }
        best.map(|entry| (&entry.unit, entry.state))
    }

    /// Every peer (excluding this unit) sits in `state`.
    pub fn all_peers_in(&self, state: LifecycleState) -> bool {
        self.peers.iter().all(|entry| entry.state == state)
    }
}
