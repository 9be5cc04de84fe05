//! Application configuration
//!
//! `AppConfig` carries process-wide settings resolved from the command line.
//! `EngineSettings` is the optional TOML file that tunes the engine; every
//! field has a default so an empty file is valid.

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::mapreduce::MapReduceOptions;
use crate::orchestration::RetryPolicy;

/// Default location for persisted instance histories
pub fn default_state_dir() -> PathBuf {
    ProjectDirs::from("com", "tripreduce", "tripreduce")
        .map(|dirs| dirs.data_dir().join("instances"))
        .unwrap_or_else(|| PathBuf::from(".tripreduce"))
}

/// Application configuration structure
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Verbosity level for logging
    pub verbose: u8,
    /// Engine settings, file values already merged with CLI overrides
    pub settings: EngineSettings,
}

impl AppConfig {
    pub fn new(verbose: u8) -> Self {
        Self {
            verbose,
            settings: EngineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Get the log level string based on verbosity
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            2 => "trace",
            _ => "trace,hyper=debug,tower=debug",
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperSettings {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub first_retry_interval: Duration,
    pub backoff_coefficient: f64,
    #[serde(with = "humantime_serde")]
    pub max_retry_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl Default for MapperSettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            first_retry_interval: policy.first_retry_interval,
            backoff_coefficient: policy.backoff_coefficient,
            max_retry_interval: policy.max_retry_interval,
            timeout: policy.timeout,
        }
    }
}

impl MapperSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            first_retry_interval: self.first_retry_interval,
            backoff_coefficient: self.backoff_coefficient,
            max_retry_interval: self.max_retry_interval,
            timeout: self.timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingSettings {
    pub page_size: usize,
}

impl Default for ListingSettings {
    fn default() -> Self {
        Self { page_size: 5000 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    pub enabled: bool,
    /// Container the report is written to, e.g. `file:///var/results`
    pub container: Option<String>,
}

/// Contents of the `--config` TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub state_dir: PathBuf,
    pub max_concurrent_activities: usize,
    pub mapper: MapperSettings,
    pub listing: ListingSettings,
    pub sink: SinkSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            max_concurrent_activities: 64,
            mapper: MapperSettings::default(),
            listing: ListingSettings::default(),
            sink: SinkSettings::default(),
        }
    }
}

impl EngineSettings {
    /// Load settings from `path`, or defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_activities == 0 {
            return Err(anyhow!("max_concurrent_activities must be at least 1"));
        }
        if self.listing.page_size == 0 {
            return Err(anyhow!("listing.page_size must be at least 1"));
        }
        if self.mapper.backoff_coefficient < 1.0 {
            return Err(anyhow!("mapper.backoff_coefficient must be >= 1.0"));
        }
        if self.sink.enabled && self.sink.container.is_none() {
            return Err(anyhow!("sink.container is required when sink.enabled is true"));
        }
        Ok(())
    }

    pub fn with_state_dir(mut self, state_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = state_dir {
            self.state_dir = dir;
        }
        self
    }

    /// Result container to attach to new work requests
    pub fn result_container(&self) -> Option<String> {
        if self.sink.enabled {
            self.sink.container.clone()
        } else {
            None
        }
    }

    pub fn mapreduce_options(&self) -> MapReduceOptions {
        MapReduceOptions {
            mapper_policy: self.mapper.retry_policy(),
            page_size: self.listing.page_size,
            max_concurrent: self.max_concurrent_activities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_log_levels_follow_verbosity() {
        assert_eq!(AppConfig::new(0).log_level(), "info");
        assert_eq!(AppConfig::new(1).log_level(), "debug");
        assert_eq!(AppConfig::new(2).log_level(), "trace");
        assert_eq!(AppConfig::new(5).log_level(), "trace,hyper=debug,tower=debug");
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let settings = EngineSettings::from_toml("").unwrap();
        assert_eq!(settings.max_concurrent_activities, 64);
        assert_eq!(settings.listing.page_size, 5000);
        assert_eq!(settings.mapper.retry_policy(), RetryPolicy::default());
        assert!(settings.result_container().is_none());
    }

    #[test]
    fn test_humantime_values_parse() {
        let settings = EngineSettings::from_toml(
            r#"
            state_dir = "/tmp/tripreduce"
            max_concurrent_activities = 8

            [mapper]
            max_attempts = 5
            first_retry_interval = "250ms"
            timeout = "2m"

            [sink]
            enabled = true
            container = "file:///tmp/results"
            "#,
        )
        .unwrap();

        let policy = settings.mapreduce_options().mapper_policy;
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.first_retry_interval, Duration::from_millis(250));
        assert_eq!(policy.timeout, Some(Duration::from_secs(120)));
        assert_eq!(policy.max_retry_interval, Duration::from_secs(30));
        assert_eq!(
            settings.result_container().as_deref(),
            Some("file:///tmp/results")
        );
        assert_eq!(settings.state_dir, PathBuf::from("/tmp/tripreduce"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(EngineSettings::from_toml("max_concurrent_activities = 0").is_err());
        assert!(EngineSettings::from_toml("[sink]\nenabled = true").is_err());
        assert!(EngineSettings::from_toml("[mapper]\ntimeout = \"soon\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[listing]\npage_size = 10").unwrap();
        let settings = EngineSettings::load(Some(file.path())).unwrap();
        assert_eq!(settings.listing.page_size, 10);
        assert!(EngineSettings::load(None).is_ok());
    }
}
