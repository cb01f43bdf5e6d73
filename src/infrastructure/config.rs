//! Layered configuration: defaults, optional TOML file, environment.
//!
//! Environment variables use the `HARVEST` prefix with `__` separating
//! nesting levels, e.g. `HARVEST_PIPELINE__WORKERS=4`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::infrastructure::database_connection::default_database_path;
use crate::pool::PoolConfig;
use crate::sync::SyncConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvesterConfig {
    pub database_url: String,
    pub pool: PoolSettings,
    pub sync: SyncConfig,
    pub pipeline: PipelineSettings,
    pub harvest: HarvestSettings,
    pub logging: LoggingConfig,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_path(),
            pool: PoolSettings::default(),
            sync: SyncConfig::default(),
            pipeline: PipelineSettings::default(),
            harvest: HarvestSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl HarvesterConfig {
    /// Load configuration, layering an optional file and the environment
    /// over built-in defaults.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(false));
        }
        let settings = builder
            .add_source(Environment::with_prefix("HARVEST").separator("__"))
            .build()
            .context("building configuration")?;

        let mut config: Self = settings
            .try_deserialize()
            .context("deserializing configuration")?;
        if config.database_url.is_empty() {
            config.database_url = default_database_path();
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Concurrent sessions; `None` sizes to the machine's cores.
    pub size: Option<usize>,
    pub startup_jitter_ms: u64,
}

impl PoolSettings {
    #[must_use]
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            size: self.size,
            startup_jitter: Duration::from_millis(self.startup_jitter_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub queue_capacity: usize,
    pub workers: usize,
    pub shutdown_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            workers: 2,
            shutdown_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestSettings {
    /// Base politeness delay between page reads; the actual pause is
    /// jittered around this value.
    pub request_delay_ms: u64,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            request_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_output: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = HarvesterConfig::default();
        assert!(config.database_url.starts_with("sqlite:"));
        assert_eq!(config.pipeline.workers, 2);
        assert_eq!(config.sync.give_up, 10);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            "database_url = \"sqlite:/tmp/custom.db\"\n\n\
             [pipeline]\nworkers = 7\n\n[sync]\ngive_up = 3"
        )
        .unwrap();

        let config = HarvesterConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.database_url, "sqlite:/tmp/custom.db");
        assert_eq!(config.pipeline.workers, 7);
        assert_eq!(config.sync.give_up, 3);
        // Untouched sections keep their defaults.
        assert_eq!(config.pipeline.queue_capacity, 64);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = HarvesterConfig::load(Some(Path::new("/nonexistent/h.toml"))).unwrap();
        assert_eq!(config.harvest.request_delay_ms, 1000);
    }
}
