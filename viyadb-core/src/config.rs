//! Configuration for the ViyaDB core engine

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage/segment sizing defaults
    pub storage: StorageConfig,

    /// Upsert-engine tuning
    pub upsert: UpsertConfig,

    /// Directory-watch defaults
    pub watch: WatchConfig,

    /// Write-pool / read-pool sizing
    pub threads: ThreadPoolConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            upsert: UpsertConfig::default(),
            watch: WatchConfig::default(),
            threads: ThreadPoolConfig::default(),
        }
    }
}

/// Storage engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Default number of records per segment when a table descriptor
    /// omits `segment_size`
    pub default_segment_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            default_segment_size: 1_000_000,
        }
    }
}

/// Upsert engine tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertConfig {
    /// Minimum number of upserts between bitset-metric optimization passes
    pub updates_before_optimize: u64,
}

impl Default for UpsertConfig {
    fn default() -> Self {
        Self {
            updates_before_optimize: 1024,
        }
    }
}

/// Directory-watch defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Default file extensions recognized by a watch directory
    pub default_extensions: Vec<String>,

    /// Poll interval used by the background watcher thread
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            default_extensions: vec![".tsv".to_string()],
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Write-pool / read-pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadPoolConfig {
    /// Number of threads serializing ingest per database (default 1, per
    /// the single-writer-per-table concurrency discipline)
    pub write_threads: usize,

    /// Number of threads available to run queries concurrently
    pub read_threads: usize,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            write_threads: 1,
            read_threads: num_cpus::get().max(1),
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.storage.default_segment_size, 1_000_000);
        assert_eq!(config.upsert.updates_before_optimize, 1024);
        assert_eq!(config.threads.write_threads, 1);
        assert_eq!(config.watch.default_extensions, vec![".tsv".to_string()]);
    }

    #[test]
    fn test_config_roundtrip_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.storage.default_segment_size, config.storage.default_segment_size);
    }
}
