//! Configuration management for TabletDB

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Main configuration structure for a TabletDB storage node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML, YAML or JSON file, chosen by extension
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to read config file");
            Error::Config(format!("Failed to read config file: {}", e))
        })?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or_default();
        let parsed: std::result::Result<Config, String> = match extension {
            "toml" => toml::from_str(&content).map_err(|e| format!("Failed to parse TOML config: {}", e)),
            "yaml" | "yml" => {
                serde_yaml::from_str(&content).map_err(|e| format!("Failed to parse YAML config: {}", e))
            }
            _ => serde_json::from_str(&content).map_err(|e| format!("Failed to parse JSON config: {}", e)),
        };

        let config: Config = parsed.map_err(|message| {
            warn!(path = %path.display(), error = %message, "Rejected config file");
            Error::Config(message)
        })?;
        debug!(path = %path.display(), db_root_path = %config.storage.db_root_path, "Loaded config");

        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory; each table lives under `<db_root_path>/<tid>_<pid>/data`
    pub db_root_path: String,
    /// Flush the store after every successful mutation
    pub sync_write: bool,
    /// Option template for tables on the SSD tier
    pub ssd: TierConfig,
    /// Option template for tables on the HDD tier
    pub hdd: TierConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_root_path: "/var/lib/tabletdb/db".to_string(),
            sync_write: false,
            ssd: TierConfig::ssd(),
            hdd: TierConfig::hdd(),
        }
    }
}

/// Store behaviour preset for a tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TierMode {
    /// Favour write and random-read latency
    HighThroughput,
    /// Favour on-disk footprint and sequential access
    LowSpace,
}

/// Per-tier tuning applied to every table of that tier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierConfig {
    /// Page cache size in bytes
    pub cache_capacity: u64,
    /// Interval between background flushes of buffered writes
    pub flush_every_ms: Option<u64>,
    /// Log segment (write buffer) size in bytes, a power of two
    pub segment_size: usize,
    /// Store behaviour preset
    pub mode: TierMode,
    /// Column families compacted in parallel by version compaction
    pub compaction_threads: usize,
    /// Physical entries fetched per traversal read
    pub readahead_entries: usize,
}

impl TierConfig {
    /// Low latency random reads: small buffers, frequent flushes, wide compaction
    pub fn ssd() -> Self {
        Self {
            cache_capacity: 512 * 1024 * 1024, // 512MB
            flush_every_ms: Some(200),
            segment_size: 512 * 1024, // 512KB
            mode: TierMode::HighThroughput,
            compaction_threads: 4,
            readahead_entries: 64,
        }
    }

    /// Sequential throughput: large buffers, lazy flushes, single compaction thread
    pub fn hdd() -> Self {
        Self {
            cache_capacity: 512 * 1024 * 1024, // 512MB
            flush_every_ms: Some(1000),
            segment_size: 4 * 1024 * 1024, // 4MB
            mode: TierMode::LowSpace,
            compaction_threads: 1,
            readahead_entries: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG` when set
    pub filter: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
    /// Include the event target in output
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "tabletdb=info".to_string(),
            json: false,
            with_target: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_tiers_differ() {
        let config = StorageConfig::default();
        assert!(config.ssd.segment_size < config.hdd.segment_size);
        assert!(config.ssd.compaction_threads > config.hdd.compaction_threads);
        assert!(config.ssd.readahead_entries < config.hdd.readahead_entries);
    }

    #[test]
    fn test_load_toml_with_partial_sections() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[storage]\ndb_root_path = \"/tmp/tablets\"\nsync_write = true\n\n[logging]\njson = true"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.storage.db_root_path, "/tmp/tablets");
        assert!(config.storage.sync_write);
        assert_eq!(config.storage.ssd, TierConfig::ssd());
        assert!(config.logging.json);
        assert_eq!(config.logging.filter, "tabletdb=info");
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"storage": {{"db_root_path": "/data"}}}}"#).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.storage.db_root_path, "/data");
        assert!(!config.storage.sync_write);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(file, "storage: [unterminated").unwrap();

        assert!(matches!(Config::load(file.path()), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_reports_json_and_missing_files_as_config_errors() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{{\"storage\": ").unwrap();
        assert!(matches!(Config::load(file.path()), Err(Error::Config(message)) if message.contains("JSON")));

        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(Config::load(missing), Err(Error::Config(message)) if message.contains("read")));
    }
}
