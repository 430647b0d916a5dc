//! Built-in defaults (layer 1)

use serde::{Deserialize, Serialize};

/// Host-wide config consulted when `--host-config` is not given
pub const DEFAULT_HOST_CONFIG: &str = "/etc/dpe-bench/config.toml";

/// Unit config consulted when `--config` is not given
pub const DEFAULT_UNIT_CONFIG: &str = "dpe-bench.toml";

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Root for peer documents and workload state (default: /var/lib/dpe-bench)
    pub state_dir: String,

    /// Benchmark name passed to workload commands (default: "dpe-benchmark")
    pub test_name: String,

    /// Log filter when RUST_LOG is unset (default: "info")
    pub log_level: String,

    /// Grace period between SIGTERM and SIGKILL (default: 10)
    pub stop_grace_seconds: u64,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            state_dir: "/var/lib/dpe-bench".to_string(),
            test_name: "dpe-benchmark".to_string(),
            log_level: "info".to_string(),
            stop_grace_seconds: 10,
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "state_dir": self.state_dir,
            "test_name": self.test_name,
            "log_level": self.log_level,
            "workload": {
                "stop_grace_seconds": self.stop_grace_seconds
            }
        })
    }
}
