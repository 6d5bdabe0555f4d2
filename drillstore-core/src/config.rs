//! # Configuration Management
//!
//! Settings consumed by the chunk store, the growing-object lifecycle and the CLI.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::IndexKind;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunk: ChunkConfig,
    pub growing: GrowingConfig,
    pub limits: LimitsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a JSON file. Missing sections fall back to defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text).map_err(|e| Error::Configuration {
            message: format!("{}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.chunk.depth_range_size > 0.0) {
            return Err(Error::Configuration {
                message: "chunk.depth_range_size must be positive".into(),
            });
        }
        if self.chunk.time_range_size_secs == 0 {
            return Err(Error::Configuration {
                message: "chunk.time_range_size_secs must be positive".into(),
            });
        }
        if self.chunk.max_document_size == 0 {
            return Err(Error::Configuration {
                message: "chunk.max_document_size must be positive".into(),
            });
        }
        if self.limits.max_data_nodes == 0 || self.limits.max_data_points == 0 {
            return Err(Error::Configuration {
                message: "limits must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Chunk partitioning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Target index-range width of a depth chunk
    pub depth_range_size: f64,
    /// Target index-range width of a time chunk
    pub time_range_size_secs: u64,
    /// Ceiling on the encoded size of one chunk document
    pub max_document_size: usize,
}

impl ChunkConfig {
    /// Chunk width in index units for the given index kind.
    /// Time indices are keyed in microseconds.
    pub fn range_size(&self, kind: IndexKind) -> f64 {
        match kind {
            IndexKind::Depth => self.depth_range_size,
            IndexKind::Time => self.time_range_size_secs as f64 * 1_000_000.0,
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            depth_range_size: 1000.0,
            time_range_size_secs: 24 * 3600,
            max_document_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

/// Growing-object expiry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowingConfig {
    /// Timeout applied to object types without an explicit entry
    pub default_timeout_secs: u64,
    /// Per object type timeout, e.g. `{"log": 60, "trajectory": 300}`
    pub timeouts: HashMap<String, u64>,
    /// How often the background sweep runs
    pub sweep_interval_secs: u64,
}

impl GrowingConfig {
    pub fn timeout_for(&self, object_type: &str) -> Duration {
        let secs = self
            .timeouts
            .get(object_type)
            .copied()
            .unwrap_or(self.default_timeout_secs);
        Duration::from_secs(secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Object types the sweep always visits, on top of those with tracking records
    pub fn object_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.timeouts.keys().cloned().collect();
        for default_type in ["log", "channelset", "trajectory", "mudlog"] {
            if !types.iter().any(|t| t == default_type) {
                types.push(default_type.to_string());
            }
        }
        types.sort();
        types
    }
}

impl Default for GrowingConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 60,
            timeouts: HashMap::new(),
            sweep_interval_secs: 30,
        }
    }
}

/// Per-operation limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum rows accepted by a single write
    pub max_data_nodes: usize,
    /// Maximum rows returned by a single read
    pub max_data_points: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_data_nodes: 10_000,
            max_data_points: 1_000_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
        }
    }
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk.range_size(IndexKind::Depth), 1000.0);
        assert_eq!(
            config.chunk.range_size(IndexKind::Time),
            86_400.0 * 1_000_000.0
        );
    }

    #[test]
    fn test_timeout_lookup() {
        let mut growing = GrowingConfig::default();
        growing.timeouts.insert("log".into(), 5);
        assert_eq!(growing.timeout_for("log"), Duration::from_secs(5));
        assert_eq!(growing.timeout_for("mudlog"), Duration::from_secs(60));
        assert!(growing.object_types().contains(&"trajectory".to_string()));
    }

    #[test]
    fn test_load_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"chunk": {{"depth_range_size": 500.0}}, "logging": {{"level": "debug"}}}}"#
        )
        .unwrap();

        let config = Config::from_json_file(file.path()).unwrap();
        assert_eq!(config.chunk.depth_range_size, 500.0);
        assert_eq!(config.chunk.max_document_size, 16 * 1024 * 1024);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.chunk.depth_range_size = 0.0;
        assert!(matches!(
            config.validate(),
            Err(Error::Configuration { .. })
        ));
    }
}
