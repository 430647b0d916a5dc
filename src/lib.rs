//! dpe-bench - peer-coordinated benchmark lifecycle
//!
//! Each unit of a database deployment runs one benchmark workload. Units
//! share their lifecycle state through a peer store and follow the most
//! advanced peer, so an operator action on one unit carries the fleet.

pub mod config;
pub mod lifecycle;
pub mod store;
pub mod workload;

pub use config::{BenchConfig, ConfigError, EffectiveConfig};
pub use lifecycle::{AdvanceOutcome, LifecycleManager, PeerView, Status, StatusKind, TransitionError};
pub use store::{FilePeerStore, InMemoryPeerStore, PeerGroup};
pub use workload::MockWorkload;

pub use dpe_core::{
    LifecycleState, LifecycleTransition, PeerStore, UnitId, UnitLifecycleRecord, WorkloadDriver,
    WorkloadError, WorkloadOp, WorkloadOptions,
};
