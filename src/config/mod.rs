//! Configuration merge system
//!
//! Implements the 4-layer configuration merge:
//! 1. Built-in defaults
//! 2. Host config (/etc/dpe-bench/config.toml)
//! 3. Unit config (./dpe-bench.toml)
//! 4. CLI flags

mod bench;
mod defaults;
mod effective;
mod merge;

pub use bench::{BenchConfig, WorkloadCommands};
pub use defaults::{BuiltinDefaults, DEFAULT_HOST_CONFIG, DEFAULT_UNIT_CONFIG};
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig};
pub use merge::{deep_merge, merge_layers};
