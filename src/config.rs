//! Configuration management for suitey
//!
//! Settings load from environment variables with fallback defaults. CLI
//! flags override individual fields after loading.
//!
//! # Environment Variables
//!
//! - `SUITEY_MAX_PARALLEL`: upper bound on concurrent steps - default: CPU count
//! - `SUITEY_MEMORY_HEADROOM`: fraction of memory withheld from containers - default: "0.2"
//! - `SUITEY_MIN_CONTAINER_MEMORY_MB`: floor for per-container memory - default: "256"
//! - `SUITEY_CONTAINER_MEMORY_MB`: fixed per-container memory - default: computed
//! - `SUITEY_TEMP_DIR`: shared result directory - default: system temp dir + "suitey"
//! - `SUITEY_ARTIFACT_DIR`: artifact root - default: system temp dir + "suitey-artifacts"
//! - `SUITEY_ACQUIRE_TIMEOUT`: seconds to wait for a pool slot - default: "600"
//! - `SUITEY_MEMORY_WAIT_TIMEOUT`: seconds to wait for free memory - default: "60"
//! - `SUITEY_STOP_TIMEOUT`: seconds a container gets to stop - default: "10"
//! - `SUITEY_POLL_INTERVAL_MS`: polling interval - default: "200"
//! - `SUITEY_LOG_LEVEL`: logging level - default: "info"
//!
//! # Example
//!
//! ```no_run
//! use suitey::SuiteyConfig;
//!
//! let config = SuiteyConfig::default();
//! config.validate().expect("Invalid configuration");
//! println!("{}", config);
//! ```

use crate::resources::{DEFAULT_FLOOR_MB, DEFAULT_HEADROOM};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 600;
const DEFAULT_MEMORY_WAIT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuiteyConfig {
    /// Requested parallelism; `None` uses every CPU
    pub max_parallel: Option<usize>,

    /// Fraction of memory withheld from containers, `0.0..1.0`
    pub memory_headroom: f64,

    pub min_container_memory_mb: u64,

    /// Overrides the computed per-container memory
    pub container_memory_mb: Option<u64>,

    pub temp_dir: PathBuf,

    pub artifact_dir: PathBuf,

    pub acquire_timeout_secs: u64,

    pub memory_wait_timeout_secs: u64,

    pub stop_timeout_secs: u64,

    pub poll_interval_ms: u64,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Reads `key`, falling back to `None` with a warning when it does not parse
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(variable = key, value = %raw, "Ignoring unparseable value");
            None
        }
    }
}

impl Default for SuiteyConfig {
    /// Loads from `SUITEY_*` environment variables with defaults
    fn default() -> Self {
        let temp_root = env::temp_dir();
        Self {
            max_parallel: env_parse::<usize>("SUITEY_MAX_PARALLEL").filter(|n| *n > 0),
            memory_headroom: env_parse("SUITEY_MEMORY_HEADROOM").unwrap_or(DEFAULT_HEADROOM),
            min_container_memory_mb: env_parse("SUITEY_MIN_CONTAINER_MEMORY_MB")
                .unwrap_or(DEFAULT_FLOOR_MB),
            container_memory_mb: env_parse::<u64>("SUITEY_CONTAINER_MEMORY_MB")
                .filter(|mb| *mb > 0),
            temp_dir: env::var("SUITEY_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| temp_root.join("suitey")),
            artifact_dir: env::var("SUITEY_ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| temp_root.join("suitey-artifacts")),
            acquire_timeout_secs: env_parse("SUITEY_ACQUIRE_TIMEOUT")
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            memory_wait_timeout_secs: env_parse("SUITEY_MEMORY_WAIT_TIMEOUT")
                .unwrap_or(DEFAULT_MEMORY_WAIT_TIMEOUT_SECS),
            stop_timeout_secs: env_parse("SUITEY_STOP_TIMEOUT")
                .unwrap_or(DEFAULT_STOP_TIMEOUT_SECS),
            poll_interval_ms: env_parse("SUITEY_POLL_INTERVAL_MS")
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            log_level: env::var("SUITEY_LOG_LEVEL")
                .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
                .to_lowercase(),
        }
    }
}

impl SuiteyConfig {
    /// Checks numeric ranges and the log level
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.memory_headroom) {
            return Err(ConfigError::ValidationFailed(format!(
                "Memory headroom must be in [0, 1), got {}",
                self.memory_headroom
            )));
        }
        if self.min_container_memory_mb == 0 {
            return Err(ConfigError::ValidationFailed(
                "Minimum container memory must be at least 1 MB".to_string(),
            ));
        }
        if self.acquire_timeout_secs == 0 || self.acquire_timeout_secs > 86_400 {
            return Err(ConfigError::ValidationFailed(
                "Acquire timeout must be between 1 second and 24 hours".to_string(),
            ));
        }
        if self.memory_wait_timeout_secs > 3_600 {
            return Err(ConfigError::ValidationFailed(
                "Memory wait timeout cannot exceed 1 hour".to_string(),
            ));
        }
        if self.stop_timeout_secs > 600 {
            return Err(ConfigError::ValidationFailed(
                "Stop timeout cannot exceed 10 minutes".to_string(),
            ));
        }
        if !(10..=60_000).contains(&self.poll_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "Poll interval must be between 10 ms and 60 s".to_string(),
            ));
        }
        if self.temp_dir == self.artifact_dir {
            return Err(ConfigError::ValidationFailed(
                "Temp and artifact directories must differ".to_string(),
            ));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn memory_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.memory_wait_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn to_display_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();

        map.insert(
            "max_parallel".to_string(),
            self.max_parallel
                .map(|n| n.to_string())
                .unwrap_or_else(|| "auto".to_string()),
        );
        map.insert(
            "memory_headroom".to_string(),
            self.memory_headroom.to_string(),
        );
        map.insert(
            "min_container_memory_mb".to_string(),
            self.min_container_memory_mb.to_string(),
        );
        map.insert(
            "container_memory_mb".to_string(),
            self.container_memory_mb
                .map(|n| n.to_string())
                .unwrap_or_else(|| "auto".to_string()),
        );
        map.insert("temp_dir".to_string(), self.temp_dir.display().to_string());
        map.insert(
            "artifact_dir".to_string(),
            self.artifact_dir.display().to_string(),
        );
        map.insert(
            "acquire_timeout_secs".to_string(),
            self.acquire_timeout_secs.to_string(),
        );
        map.insert(
            "memory_wait_timeout_secs".to_string(),
            self.memory_wait_timeout_secs.to_string(),
        );
        map.insert(
            "stop_timeout_secs".to_string(),
            self.stop_timeout_secs.to_string(),
        );
        map.insert(
            "poll_interval_ms".to_string(),
            self.poll_interval_ms.to_string(),
        );
        map.insert("log_level".to_string(), self.log_level.clone());

        map
    }
}

impl fmt::Display for SuiteyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Suitey Configuration:")?;
        match self.max_parallel {
            Some(n) => writeln!(f, "  Max Parallel: {}", n)?,
            None => writeln!(f, "  Max Parallel: auto")?,
        }
        writeln!(f, "  Memory Headroom: {:.0}%", self.memory_headroom * 100.0)?;
        writeln!(
            f,
            "  Min Container Memory: {} MB",
            self.min_container_memory_mb
        )?;
        if let Some(mb) = self.container_memory_mb {
            writeln!(f, "  Container Memory: {} MB", mb)?;
        }
        writeln!(f, "  Temp Dir: {}", self.temp_dir.display())?;
        writeln!(f, "  Artifact Dir: {}", self.artifact_dir.display())?;
        writeln!(f, "  Acquire Timeout: {}s", self.acquire_timeout_secs)?;
        writeln!(f, "  Stop Timeout: {}s", self.stop_timeout_secs)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "SUITEY_MAX_PARALLEL",
        "SUITEY_MEMORY_HEADROOM",
        "SUITEY_MIN_CONTAINER_MEMORY_MB",
        "SUITEY_CONTAINER_MEMORY_MB",
        "SUITEY_TEMP_DIR",
        "SUITEY_ARTIFACT_DIR",
        "SUITEY_ACQUIRE_TIMEOUT",
        "SUITEY_MEMORY_WAIT_TIMEOUT",
        "SUITEY_STOP_TIMEOUT",
        "SUITEY_POLL_INTERVAL_MS",
        "SUITEY_LOG_LEVEL",
    ];

    /// Helper to temporarily set environment variables for testing
    struct EnvGuard {
        key: String,
        old_value: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let old_value = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                old_value,
            }
        }

        fn unset(key: &str) -> Self {
            let old_value = env::var(key).ok();
            env::remove_var(key);
            Self {
                key: key.to_string(),
                old_value,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.old_value {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }

    fn clean_env() -> Vec<EnvGuard> {
        VARS.iter().map(|k| EnvGuard::unset(k)).collect()
    }

    #[test]
    #[serial]
    fn test_default_configuration() {
        let _guards = clean_env();

        let config = SuiteyConfig::default();

        assert_eq!(config.max_parallel, None);
        assert_eq!(config.memory_headroom, DEFAULT_HEADROOM);
        assert_eq!(config.min_container_memory_mb, DEFAULT_FLOOR_MB);
        assert_eq!(config.container_memory_mb, None);
        assert_eq!(config.temp_dir, env::temp_dir().join("suitey"));
        assert_eq!(config.acquire_timeout_secs, DEFAULT_ACQUIRE_TIMEOUT_SECS);
        assert_eq!(config.stop_timeout(), Duration::from_secs(10));
        assert_eq!(config.poll_interval(), Duration::from_millis(200));
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_environment_variable_parsing() {
        let _clean = clean_env();
        let _guards = vec![
            EnvGuard::set("SUITEY_MAX_PARALLEL", "3"),
            EnvGuard::set("SUITEY_MEMORY_HEADROOM", "0.5"),
            EnvGuard::set("SUITEY_CONTAINER_MEMORY_MB", "2048"),
            EnvGuard::set("SUITEY_TEMP_DIR", "/var/tmp/results"),
            EnvGuard::set("SUITEY_STOP_TIMEOUT", "3"),
            EnvGuard::set("SUITEY_LOG_LEVEL", "DEBUG"),
        ];

        let config = SuiteyConfig::default();

        assert_eq!(config.max_parallel, Some(3));
        assert_eq!(config.memory_headroom, 0.5);
        assert_eq!(config.container_memory_mb, Some(2048));
        assert_eq!(config.temp_dir, PathBuf::from("/var/tmp/results"));
        assert_eq!(config.stop_timeout_secs, 3);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    #[serial]
    fn test_unparseable_values_fall_back() {
        let _clean = clean_env();
        let _guards = vec![
            EnvGuard::set("SUITEY_MAX_PARALLEL", "lots"),
            EnvGuard::set("SUITEY_POLL_INTERVAL_MS", "-5"),
            EnvGuard::set("SUITEY_CONTAINER_MEMORY_MB", "0"),
        ];

        let config = SuiteyConfig::default();
        assert_eq!(config.max_parallel, None);
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.container_memory_mb, None);
    }

    #[test]
    #[serial]
    fn test_validation_rejects_out_of_range() {
        let _clean = clean_env();

        let mut config = SuiteyConfig::default();
        config.memory_headroom = 1.0;
        assert!(config.validate().is_err());

        let mut config = SuiteyConfig::default();
        config.poll_interval_ms = 1;
        assert!(config.validate().is_err());

        let mut config = SuiteyConfig::default();
        config.acquire_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = SuiteyConfig::default();
        config.artifact_dir = config.temp_dir.clone();
        assert!(config.validate().is_err());

        let mut config = SuiteyConfig::default();
        config.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_display_map_and_display() {
        let _clean = clean_env();
        let config = SuiteyConfig::default();

        let map = config.to_display_map();
        assert_eq!(map.get("max_parallel").map(String::as_str), Some("auto"));
        assert_eq!(map.get("memory_headroom").map(String::as_str), Some("0.2"));

        let display = format!("{}", config);
        assert!(display.contains("Suitey Configuration:"));
        assert!(display.contains("Memory Headroom: 20%"));
    }
}
