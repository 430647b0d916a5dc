//! Peer store backends
//!
//! - `memory`: shared in-process group, one handle per unit
//! - `file`: one JSON document per unit in a shared directory

mod file;
mod memory;

pub use file::{FilePeerStore, SCHEMA_ID, SCHEMA_VERSION};
pub use memory::{InMemoryPeerStore, PeerGroup};
