//! Peer store contract.
//!
//! Each unit writes only its own record and reads everyone's latest known
//! record. Reads may lag behind peer writes; the lifecycle manager treats
//! every read as an eventually-consistent snapshot.

use std::collections::BTreeSet;
use std::io;

use crate::state::LifecycleState;
use crate::unit::{UnitId, UnitLifecycleRecord};

/// Errors surfaced by a peer store backend
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Peer store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value peer store with per-unit write ownership.
pub trait PeerStore {
    /// The unit this store handle writes for
    fn this_unit(&self) -> &UnitId;

    /// Latest known record of `unit`, `None` if it never wrote one.
    fn unit_record(&self, unit: &UnitId) -> Result<Option<UnitLifecycleRecord>, StoreError>;

    /// Commit this unit's own state.
    fn set_own_state(&self, state: LifecycleState) -> Result<(), StoreError>;

    /// Every known unit except this one.
    fn list_peer_ids(&self) -> Result<BTreeSet<UnitId>, StoreError>;

    /// Latest known state of `unit`; a unit that never wrote is `Unset`.
    fn get_unit_state(&self, unit: &UnitId) -> Result<LifecycleState, StoreError> {
        Ok(self
            .unit_record(unit)?
            .map(|record| record.state)
            .unwrap_or_default())
    }
}
