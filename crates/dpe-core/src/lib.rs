//! DPE Bench Core Types
//!
//! Shared vocabulary for the benchmark lifecycle: the lifecycle states and
//! transitions, unit identities and records, and the two collaborator
//! contracts the lifecycle manager depends on (peer store, workload driver).

pub mod options;
pub mod state;
pub mod store;
pub mod unit;
pub mod workload;

pub use options::{InvalidOption, WorkloadOptions};
pub use state::{LifecycleState, LifecycleTransition, ParseStateError};
pub use store::{PeerStore, StoreError};
pub use unit::{next_seq, UnitId, UnitLifecycleRecord};
pub use workload::{WorkloadDriver, WorkloadError, WorkloadOp};
