//! Benchmark tuning options handed to the workload tool.

use serde::{Deserialize, Serialize};

/// An option outside its accepted range
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid workload option {field}: {reason}")]
pub struct InvalidOption {
    pub field: &'static str,
    pub reason: &'static str,
}

/// Execution options of one benchmark run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkloadOptions {
    /// Workload definition the tool should load (default: "default")
    pub workload_name: String,

    /// Optional sizing profile of the workload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload_profile: Option<String>,

    /// Client threads per process (default: 1)
    pub threads: u32,

    /// Benchmark processes per unit (default: 1)
    pub parallel_processes: u32,

    /// Seconds per run, 0 runs until stopped (default: 0)
    pub duration: u64,

    /// Number of runs, 0 repeats until stopped (default: 1)
    pub run_count: u32,

    /// Seconds between progress reports (default: 10)
    pub report_interval: u64,
}

impl Default for WorkloadOptions {
    fn default() -> Self {
        Self {
            workload_name: "default".to_string(),
            workload_profile: None,
            threads: 1,
            parallel_processes: 1,
            duration: 0,
            run_count: 1,
            report_interval: 10,
        }
    }
}

impl WorkloadOptions {
    pub fn validate(&self) -> Result<(), InvalidOption> {
        let invalid = |field, reason| Err(InvalidOption { field, reason });
        if self.workload_name.trim().is_empty() {
            return invalid("workload_name", "must not be empty");
        }
        if self.threads == 0 {
            return invalid("threads", "must be at least 1");
        }
        if self.parallel_processes == 0 {
            return invalid("parallel_processes", "must be at least 1");
        }
        if self.report_interval == 0 {
            return invalid("report_interval", "must be at least 1");
        }
        Ok(())
    }

    /// Environment variables describing these options
    pub fn env(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            ("DPE_BENCH_WORKLOAD_NAME", self.workload_name.clone()),
            ("DPE_BENCH_THREADS", self.threads.to_string()),
            ("DPE_BENCH_PARALLEL_PROCESSES", self.parallel_processes.to_string()),
            ("DPE_BENCH_DURATION", self.duration.to_string()),
            ("DPE_BENCH_RUN_COUNT", self.run_count.to_string()),
            ("DPE_BENCH_REPORT_INTERVAL", self.report_interval.to_string()),
        ];
        if let Some(profile) = &self.workload_profile {
            vars.push(("DPE_BENCH_WORKLOAD_PROFILE", profile.clone()));
        }
        vars
    }
}
