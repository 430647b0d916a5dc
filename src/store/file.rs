//! File-backed peer store
//!
//! Each unit owns `<dir>/<unit stem>.json` and replaces it atomically
//! (write-then-rename). Readers tolerate missing, half-written or foreign
//! documents: anything that cannot be decoded counts as "no record".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

use dpe_core::{next_seq, LifecycleState, PeerStore, StoreError, UnitId, UnitLifecycleRecord};

/// Schema version for unit lifecycle documents
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "dpe-bench/unit_lifecycle@1";

/// On-disk form of a unit record. `state` stays a plain string so that
/// values written by other versions still decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UnitDocument {
    schema_version: u32,
    schema_id: String,
    unit: UnitId,
    state: String,
    updated_at: DateTime<Utc>,
    seq: u64,
}

impl UnitDocument {
    fn into_record(self) -> UnitLifecycleRecord {
        let state = LifecycleState::parse_lenient(&self.state);
        if state.as_str() != self.state {
            warn!(unit = %self.unit, value = %self.state, "unknown lifecycle state, counting as unset");
        }
        UnitLifecycleRecord {
            unit: self.unit,
            state,
            updated_at: self.updated_at,
            seq: self.seq,
        }
    }
}

/// Peer store over a directory shared by all units
#[derive(Debug, Clone)]
pub struct FilePeerStore {
    dir: PathBuf,
    unit: UnitId,
}

impl FilePeerStore {
    pub fn new(dir: impl Into<PathBuf>, unit: UnitId) -> Self {
        Self {
            dir: dir.into(),
            unit,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, unit: &UnitId) -> PathBuf {
        self.dir.join(format!("{}.json", unit.file_stem()))
    }

    fn read_document(path: &Path) -> Result<Option<UnitDocument>, StoreError> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<UnitDocument>(&json) {
            Ok(doc) => Ok(Some(doc)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring undecodable peer document");
                Ok(None)
            }
        }
    }

    /// Remove this unit's document, ending its membership.
    pub fn leave(&self) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(&self.unit)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl PeerStore for FilePeerStore {
    fn this_unit(&self) -> &UnitId {
        &self.unit
    }

    fn unit_record(&self, unit: &UnitId) -> Result<Option<UnitLifecycleRecord>, StoreError> {
        let Some(doc) = Self::read_document(&self.path_for(unit))? else {
            return Ok(None);
        };
        if doc.unit != *unit {
            warn!(expected = %unit, found = %doc.unit, "peer document names a different unit");
            return Ok(None);
        }
        Ok(Some(doc.into_record()))
    }

    fn set_own_state(&self, state: LifecycleState) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&self.unit);

        // Keep seq monotonic across process restarts.
        let previous_seq = Self::read_document(&path)?.map(|doc| doc.seq);
        let seq = match previous_seq {
            Some(prev) => next_seq().max(prev + 1),
            None => next_seq(),
        };

        let doc = UnitDocument {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            unit: self.unit.clone(),
            state: state.as_str().to_string(),
            updated_at: Utc::now(),
            seq,
        };
        let json = serde_json::to_string_pretty(&doc)?;

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn list_peer_ids(&self) -> Result<BTreeSet<UnitId>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };

        let mut peers = BTreeSet::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(doc) = Self::read_document(&path)? {
                if doc.unit != self.unit {
                    peers.insert(doc.unit);
                }
            }
        }
        Ok(peers)
    }
}
