//! Cache profile configuration.
//!
//! ```toml
//! cache_time_ms = 30000
//! sweep_interval_ms = 1000
//!
//! [leak_detection]
//! enabled = true
//! max_consumers_per_object = 20
//! max_consumer_hold_time_sec = 240
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tangle_objectstorage::{LeakDetectionOptions, StorageOptions};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Leak detector settings of a cache profile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LeakDetectionConfig {
    pub enabled: bool,
    pub max_consumers_per_object: usize,
    pub max_consumer_hold_time_sec: u64,
}

impl Default for LeakDetectionConfig {
    fn default() -> Self {
        let defaults = LeakDetectionOptions::default();
        Self {
            enabled: false,
            max_consumers_per_object: defaults.max_consumers_per_object,
            max_consumer_hold_time_sec: defaults.max_consumer_hold_time.as_secs(),
        }
    }
}

/// Cache settings shared by the message and metadata stores.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheOpts {
    pub cache_time_ms: u64,
    pub sweep_interval_ms: u64,
    pub leak_detection: LeakDetectionConfig,
}

impl Default for CacheOpts {
    fn default() -> Self {
        Self {
            cache_time_ms: 30_000,
            sweep_interval_ms: 1_000,
            leak_detection: LeakDetectionConfig::default(),
        }
    }
}

impl CacheOpts {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let opts: CacheOpts = toml::from_str(contents)?;
        opts.validate()?;
        Ok(opts)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sweep_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.leak_detection.enabled && self.leak_detection.max_consumers_per_object == 0 {
            return Err(ConfigError::InvalidValue {
                field: "leak_detection.max_consumers_per_object",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn cache_time(&self) -> Duration {
        Duration::from_millis(self.cache_time_ms)
    }

    /// Leak detector thresholds, or `None` when detection is disabled.
    pub fn leak_detection_options(&self) -> Option<LeakDetectionOptions> {
        self.leak_detection.enabled.then(|| LeakDetectionOptions {
            max_consumers_per_object: self.leak_detection.max_consumers_per_object,
            max_consumer_hold_time: Duration::from_secs(self.leak_detection.max_consumer_hold_time_sec),
        })
    }

    /// Persistent storage options for one store of this profile.
    pub fn storage_options(&self, store_on_creation: bool) -> StorageOptions {
        let options = StorageOptions::default()
            .with_cache_time(self.cache_time())
            .with_persistence(true)
            .with_store_on_creation(store_on_creation)
            .with_sweep_interval(Duration::from_millis(self.sweep_interval_ms));
        match self.leak_detection_options() {
            Some(leak) => options.with_leak_detection(leak),
            None => options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_disable_leak_detection() {
        let opts = CacheOpts::default();
        assert!(opts.leak_detection_options().is_none());
        let storage = opts.storage_options(true);
        assert_eq!(storage.cache_time, Duration::from_secs(30));
        assert!(storage.store_on_creation);
        assert!(storage.persistence_enabled);
    }

    #[test]
    fn parses_full_profile() {
        let opts = CacheOpts::from_toml_str(
            r#"
            cache_time_ms = 1500
            sweep_interval_ms = 250

            [leak_detection]
            enabled = true
            max_consumers_per_object = 5
            max_consumer_hold_time_sec = 10
            "#,
        )
        .unwrap();
        assert_eq!(opts.cache_time(), Duration::from_millis(1500));
        let leak = opts.leak_detection_options().unwrap();
        assert_eq!(leak.max_consumers_per_object, 5);
        assert_eq!(leak.max_consumer_hold_time, Duration::from_secs(10));

        let storage = opts.storage_options(false);
        assert!(!storage.store_on_creation);
        assert_eq!(storage.sweep_interval, Duration::from_millis(250));
        assert!(storage.leak_detection.is_some());
    }

    #[test]
    fn missing_fields_use_defaults() {
        let opts = CacheOpts::from_toml_str("cache_time_ms = 0").unwrap();
        assert_eq!(opts.cache_time_ms, 0);
        assert_eq!(opts.sweep_interval_ms, 1_000);
        assert_eq!(opts.leak_detection, LeakDetectionConfig::default());
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = CacheOpts::from_toml_str("cache_time = 5").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_zero_sweep_interval() {
        let err = CacheOpts::from_toml_str("sweep_interval_ms = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "sweep_interval_ms",
                ..
            }
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cache_time_ms = 42").unwrap();
        let opts = CacheOpts::from_toml_file(file.path()).unwrap();
        assert_eq!(opts.cache_time_ms, 42);

        let missing = CacheOpts::from_toml_file(Path::new("/nonexistent/cache.toml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
