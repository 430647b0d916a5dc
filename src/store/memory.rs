//! In-memory peer group
//!
//! All handles joined to one `PeerGroup` share a single table. Each handle
//! only writes the row of the unit it was joined as.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use dpe_core::{LifecycleState, PeerStore, StoreError, UnitId, UnitLifecycleRecord};

type Table = BTreeMap<UnitId, Option<UnitLifecycleRecord>>;

/// Shared membership table for in-process units
#[derive(Debug, Clone, Default)]
pub struct PeerGroup {
    table: Arc<Mutex<Table>>,
}

fn lock(table: &Mutex<Table>) -> Result<MutexGuard<'_, Table>, StoreError> {
    table
        .lock()
        .map_err(|_| StoreError::Unavailable("peer table lock poisoned".to_string()))
}

impl PeerGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member (without a record) and return its store handle.
    pub fn join(&self, unit: impl Into<UnitId>) -> InMemoryPeerStore {
        let unit = unit.into();
        if let Ok(mut table) = self.table.lock() {
            table.entry(unit.clone()).or_insert(None);
        }
        InMemoryPeerStore {
            unit,
            table: Arc::clone(&self.table),
        }
    }

    /// Remove a member and its record.
    pub fn leave(&self, unit: &UnitId) {
        if let Ok(mut table) = self.table.lock() {
            table.remove(unit);
        }
    }

    pub fn members(&self) -> BTreeSet<UnitId> {
        self.table
            .lock()
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Current records of every member that wrote one
    pub fn snapshot(&self) -> Vec<UnitLifecycleRecord> {
        self.table
            .lock()
            .map(|table| table.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Overwrite a member's record, bypassing ownership (test setup only).
    pub fn force_state(&self, unit: &UnitId, state: LifecycleState) {
        if let Ok(mut table) = self.table.lock() {
            let slot = table.entry(unit.clone()).or_insert(None);
            match slot {
                Some(record) => record.update(state),
                None => *slot = Some(UnitLifecycleRecord::new(unit.clone(), state)),
            }
        }
    }
}

/// Store handle of one member of a `PeerGroup`
#[derive(Debug, Clone)]
pub struct InMemoryPeerStore {
    unit: UnitId,
    table: Arc<Mutex<Table>>,
}

impl PeerStore for InMemoryPeerStore {
    fn this_unit(&self) -> &UnitId {
        &self.unit
    }

    fn unit_record(&self, unit: &UnitId) -> Result<Option<UnitLifecycleRecord>, StoreError> {
        let table = lock(&self.table)?;
        Ok(table.get(unit).cloned().flatten())
    }

    fn set_own_state(&self, state: LifecycleState) -> Result<(), StoreError> {
        let mut table = lock(&self.table)?;
        let slot = table.entry(self.unit.clone()).or_insert(None);
        match slot {
            Some(record) => record.update(state),
            None => *slot = Some(UnitLifecycleRecord::new(self.unit.clone(), state)),
        }
        Ok(())
    }

    fn list_peer_ids(&self) -> Result<BTreeSet<UnitId>, StoreError> {
        let table = lock(&self.table)?;
        Ok(table
            .keys()
            .filter(|unit| **unit != self.unit)
            .cloned()
            .collect())
    }
}
