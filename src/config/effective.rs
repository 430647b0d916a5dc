//! Effective configuration with provenance
//!
//! The merged configuration plus where each layer came from, with
//! secret-looking values redacted before anything is printed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use dpe_core::WorkloadOptions;

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;

/// Schema version for effective_config
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "dpe-bench/effective_config@1";

/// Accepted `log_level` values
pub const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Keys that contain secrets and should be redacted
const SECRET_KEYS: &[&str] = &[
    "password",
    "token",
    "secret",
    "private_key",
    "api_key",
    "credential",
];

/// Origin of a configuration source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    Host,
    Unit,
    Cli,
}

/// A contributing config source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Merged configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub schema_version: u32,
    pub schema_id: String,
    pub created_at: DateTime<Utc>,

    /// The merged configuration object (unredacted values stay in memory only)
    #[serde(skip)]
    raw: Value,

    /// The merged configuration with secrets redacted
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,

    /// Redacted key paths
    pub redactions: Vec<String>,
}

impl EffectiveConfig {
    /// Build effective config from layers. Missing files are skipped.
    pub fn build(
        host_config_path: Option<&Path>,
        unit_config_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        for (origin, path) in [
            (ConfigOrigin::Host, host_config_path),
            (ConfigOrigin::Unit, unit_config_path),
        ] {
            let Some(path) = path.filter(|p| p.exists()) else {
                continue;
            };
            let (value, digest) = Self::load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let raw = merge_layers(layers);
        Self::validate_config(&raw)?;

        let mut config = raw.clone();
        let redactions = Self::redact_secrets(&mut config);

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            raw,
            config,
            sources,
            redactions,
        })
    }

    /// Load and parse a TOML file, returning the value and digest
    fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
        let bytes = fs::read(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let digest = hex::encode(Sha256::digest(&bytes));

        let contents = String::from_utf8(bytes)
            .map_err(|e| ConfigError::ParseError(format!("Invalid UTF-8: {}", e)))?;

        let toml_value: toml::Value = toml::from_str(&contents).map_err(|e| {
            ConfigError::ParseError(format!("{}: {}", path.display(), e))
        })?;

        Ok((Self::toml_to_json(toml_value), digest))
    }

    fn toml_to_json(toml: toml::Value) -> Value {
        match toml {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(i) => Value::Number(i.into()),
            toml::Value::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(dt) => Value::String(dt.to_string()),
            toml::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Self::toml_to_json).collect())
            }
            toml::Value::Table(table) => Value::Object(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Self::toml_to_json(v)))
                    .collect(),
            ),
        }
    }

    /// Redact secrets in place, returning the redacted paths
    fn redact_secrets(value: &mut Value) -> Vec<String> {
        let mut redactions = Vec::new();
        Self::redact_recursive(value, String::new(), &mut redactions);
        redactions
    }

    fn redact_recursive(value: &mut Value, path: String, redactions: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let current_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", path, key)
                    };

                    let key_lower = key.to_lowercase();
                    let is_secret = SECRET_KEYS.iter().any(|s| key_lower.contains(s));

                    if is_secret && !val.is_object() && !val.is_array() {
                        *val = Value::String("[REDACTED]".to_string());
                        redactions.push(current_path);
                    } else {
                        Self::redact_recursive(val, current_path, redactions);
                    }
                }
            }
            Value::Array(arr) => {
                for (i, val) in arr.iter_mut().enumerate() {
                    Self::redact_recursive(val, format!("{}[{}]", path, i), redactions);
                }
            }
            _ => {}
        }
    }

    fn validate_config(config: &Value) -> Result<(), ConfigError> {
        match config.get("unit") {
            None | Some(Value::Null) => {
                return Err(ConfigError::ValidationError(
                    "unit is required (set it in the unit config or pass --unit)".to_string(),
                ))
            }
            Some(Value::String(unit)) if unit.trim().is_empty() => {
                return Err(ConfigError::ValidationError(
                    "unit must not be empty".to_string(),
                ))
            }
            Some(Value::String(_)) => {}
            Some(_) => {
                return Err(ConfigError::ValidationError(
                    "unit must be a string".to_string(),
                ))
            }
        }

        if let Some(level) = config.get("log_level").and_then(|v| v.as_str()) {
            if !VALID_LOG_LEVELS.contains(&level) {
                return Err(ConfigError::ValidationError(format!(
                    "log_level must be one of {}",
                    VALID_LOG_LEVELS.join(", ")
                )));
            }
        }

        // stop_grace_seconds must be in (0, 300]
        if let Some(grace) = config.pointer("/workload/stop_grace_seconds") {
            match grace.as_u64() {
                Some(g) if g > 0 && g <= 300 => {}
                _ => {
                    return Err(ConfigError::ValidationError(
                        "workload.stop_grace_seconds must be in (0, 300]".to_string(),
                    ))
                }
            }
        }

        for key in ["prepare", "run", "clean"] {
            if let Some(value) = config.get("workload").and_then(|w| w.get(key)) {
                if !value.is_string() {
                    return Err(ConfigError::ValidationError(format!(
                        "workload.{} must be a shell command string",
                        key
                    )));
                }
            }
        }

        if let Some(options) = config.pointer("/workload/options") {
            let options = WorkloadOptions::deserialize(options)
                .map_err(|e| ConfigError::ValidationError(format!("workload.options: {}", e)))?;
            options
                .validate()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }

        Ok(())
    }

    /// Serialize to JSON (redacted)
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Get an unredacted value by dot-separated path
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.raw;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(|v| v.as_u64())
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|v| v.as_str())
    }

    /// Value as it would be printed (secrets redacted)
    pub fn get_redacted(&self, path: &str) -> Option<&Value> {
        let mut current = &self.config;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cli(unit: &str) -> Value {
        json!({ "unit": unit })
    }

    #[test]
    fn test_unit_is_required() {
        let err = EffectiveConfig::build(None, None, None).unwrap_err();
        assert!(err.to_string().contains("unit"));
    }

    #[test]
    fn test_defaults_with_unit() {
        let config = EffectiveConfig::build(None, None, Some(cli("bench/0"))).unwrap();

        assert_eq!(config.get_str("unit"), Some("bench/0"));
        assert_eq!(config.get_str("log_level"), Some("info"));
        assert_eq!(config.get_u64("workload.stop_grace_seconds"), Some(10));
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].origin, ConfigOrigin::Builtin);
        assert_eq!(config.sources[1].origin, ConfigOrigin::Cli);
    }

    #[test]
    fn test_invalid_log_level() {
        let overrides = json!({"unit": "bench/0", "log_level": "critical"});
        let err = EffectiveConfig::build(None, None, Some(overrides)).unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn test_invalid_grace_period() {
        for grace in [0, 301] {
            let overrides = json!({"unit": "bench/0", "workload": {"stop_grace_seconds": grace}});
            let err = EffectiveConfig::build(None, None, Some(overrides)).unwrap_err();
            assert!(err.to_string().contains("stop_grace_seconds"));
        }
    }

    #[test]
    fn test_command_must_be_string() {
        let overrides = json!({"unit": "bench/0", "workload": {"run": ["sysbench", "run"]}});
        let err = EffectiveConfig::build(None, None, Some(overrides)).unwrap_err();
        assert!(err.to_string().contains("workload.run"));
    }

    #[test]
    fn test_bad_workload_options_rejected() {
        for options in [
            json!({"threads": 0}),
            json!({"workload_name": ""}),
            json!({"threads": "many"}),
            json!({"thread_count": 8}),
        ] {
            let overrides = json!({"unit": "bench/0", "workload": {"options": options}});
            let err = EffectiveConfig::build(None, None, Some(overrides)).unwrap_err();
            assert!(err.to_string().contains("workload"), "{}", err);
        }
    }

    #[test]
    fn test_unit_file_layer_and_digest() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "unit = \"bench/1\"").unwrap();
        writeln!(temp, "[workload]").unwrap();
        writeln!(temp, "run = \"sysbench oltp_read_write run\"").unwrap();

        let config = EffectiveConfig::build(None, Some(temp.path()), None).unwrap();

        assert_eq!(config.get_str("unit"), Some("bench/1"));
        assert_eq!(
            config.get_str("workload.run"),
            Some("sysbench oltp_read_write run")
        );
        let source = &config.sources[1];
        assert_eq!(source.origin, ConfigOrigin::Unit);
        assert_eq!(source.digest.as_ref().map(|d| d.len()), Some(64));
    }

    #[test]
    fn test_cli_beats_files() {
        let mut host = NamedTempFile::new().unwrap();
        writeln!(host, "log_level = \"warn\"").unwrap();
        let mut unit = NamedTempFile::new().unwrap();
        writeln!(unit, "unit = \"bench/1\"").unwrap();
        writeln!(unit, "log_level = \"error\"").unwrap();

        let config = EffectiveConfig::build(
            Some(host.path()),
            Some(unit.path()),
            Some(json!({"log_level": "debug"})),
        )
        .unwrap();

        assert_eq!(config.get_str("log_level"), Some("debug"));
        assert_eq!(config.sources.len(), 4);
    }

    #[test]
    fn test_missing_files_are_skipped() {
        let config = EffectiveConfig::build(
            Some(Path::new("/nonexistent/dpe-bench/host.toml")),
            Some(Path::new("/nonexistent/dpe-bench.toml")),
            Some(cli("bench/0")),
        )
        .unwrap();
        assert_eq!(config.sources.len(), 2);
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "unit = ").unwrap();

        let err = EffectiveConfig::build(None, Some(temp.path()), None).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_secret_redaction_keeps_raw_value() {
        let overrides = json!({
            "unit": "bench/0",
            "target": {"password": "hunter2", "host": "10.0.0.5"}
        });

        let config = EffectiveConfig::build(None, None, Some(overrides)).unwrap();

        assert_eq!(config.get_str("target.password"), Some("hunter2"));
        assert_eq!(
            config.get_redacted("target.password"),
            Some(&json!("[REDACTED]"))
        );
        assert!(config.redactions.contains(&"target.password".to_string()));
        assert!(!config.to_json().unwrap().contains("hunter2"));
    }
}
