//! Typed view of the effective configuration

use std::path::PathBuf;

use dpe_core::{UnitId, WorkloadOptions};

use super::effective::{ConfigError, EffectiveConfig};

/// Shell commands driving the benchmark tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadCommands {
    pub prepare: Option<String>,
    pub run: Option<String>,
    pub clean: Option<String>,
    pub stop_grace_seconds: u64,
    /// Tuning passed to every command through the environment
    pub options: WorkloadOptions,
}

/// Everything the CLI needs to build a lifecycle manager for one unit
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub unit: UnitId,
    pub state_dir: PathBuf,
    /// Shared directory holding every unit's lifecycle document
    pub peer_dir: PathBuf,
    /// This unit's private workload directory
    pub workload_dir: PathBuf,
    pub test_name: String,
    pub workload: WorkloadCommands,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `[workload.options]`, defaults when the table is absent
fn workload_options(config: &EffectiveConfig) -> Result<WorkloadOptions, ConfigError> {
    let options = match config.get("workload.options") {
        None => WorkloadOptions::default(),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            ConfigError::ValidationError(format!("workload.options: {}", e))
        })?,
    };
    options
        .validate()
        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
    Ok(options)
}

impl BenchConfig {
    pub fn from_effective(config: &EffectiveConfig) -> Result<Self, ConfigError> {
        let unit = config
            .get_str("unit")
            .map(UnitId::new)
            .ok_or_else(|| ConfigError::ValidationError("unit is required".to_string()))?;

        let state_dir = PathBuf::from(config.get_str("state_dir").unwrap_or("/var/lib/dpe-bench"));
        let peer_dir = config
            .get_str("peer_dir")
            .map(PathBuf::from)
            .unwrap_or_else(|| state_dir.join("peers"));
        let workload_dir = config
            .get_str("workload_dir")
            .map(PathBuf::from)
            .unwrap_or_else(|| state_dir.join("workload").join(unit.file_stem()));

        Ok(Self {
            unit,
            peer_dir,
            workload_dir,
            state_dir,
            test_name: config
                .get_str("test_name")
                .unwrap_or("dpe-benchmark")
                .to_string(),
            workload: WorkloadCommands {
                prepare: non_empty(config.get_str("workload.prepare")),
                run: non_empty(config.get_str("workload.run")),
                clean: non_empty(config.get_str("workload.clean")),
                stop_grace_seconds: config.get_u64("workload.stop_grace_seconds").unwrap_or(10),
                options: workload_options(config)?,
            },
        })
    }

    /// Run command, required before any workload action can be driven
    pub fn require_run_command(&self) -> Result<&str, ConfigError> {
        self.workload.run.as_deref().ok_or_else(|| {
            ConfigError::ValidationError("workload.run must be set".to_string())
        })
    }
}
