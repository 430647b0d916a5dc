//! Benchmark lifecycle state machine
//!
//! States: UNSET → PREPARING → AVAILABLE → RUNNING → {FAILED | COLLECTING
//! → UPLOADING → FINISHED} with STOPPED reachable from anywhere.
//!
//! Every unit runs its own manager. Coordination happens only through the
//! peer store: each unit commits its own state and follows the most
//! advanced state among its peers.

mod manager;
mod peer;
mod readiness;
mod status;

pub use manager::{AdvanceOutcome, LifecycleManager, TransitionError};
pub use peer::{PeerEntry, PeerView};
pub use readiness::Readiness;
pub use status::{Status, StatusKind};
