//! dashsync configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::{DEFAULT_ACTIVITY_CAPACITY, DEFAULT_ALERT_CAPACITY};

/// Emitter flush coalescing window
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;
/// Consumer-side durable write debounce
pub const DEFAULT_PERSIST_DEBOUNCE_MS: u64 = 1_000;
/// Persisted records older than this are discarded (24h)
pub const DEFAULT_STATE_TTL_MS: u64 = 86_400_000;
pub const DEFAULT_MAX_ACTIVE_TASKS: usize = 10;
/// How long terminal tasks stay visible (5min)
pub const DEFAULT_TASK_RETENTION_MS: u64 = 300_000;
/// Hard cap on a persisted payload (1 MiB)
pub const DEFAULT_MAX_STATE_SIZE_BYTES: usize = 1_048_576;
/// Payloads above this are compressed (50 KiB)
pub const DEFAULT_COMPRESSION_THRESHOLD_BYTES: usize = 51_200;

/// Main dashsync configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Producer side
    pub emitter: EmitterConfig,

    /// Consumer-side durable cache
    pub persistence: PersistenceConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl Config {
    /// Reject values that would make the engine misbehave
    pub fn validate(&self) -> Result<()> {
        self.emitter.validate()?;
        self.persistence.validate()?;
        if self.persistence.max_active_tasks < self.emitter.max_active_tasks {
            return Err(eyre::eyre!(
                "persistence.max-active-tasks ({}) is below emitter.max-active-tasks ({})",
                self.persistence.max_active_tasks,
                self.emitter.max_active_tasks
            ));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local config: .dashsync.yml
        let local_config = PathBuf::from(".dashsync.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User config: ~/.config/dashsync/dashsync.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("dashsync").join("dashsync.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Write the configuration as YAML
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Producer-side settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterConfig {
    /// Coalescing window for normal-priority mutations
    #[serde(rename = "debounce-ms")]
    pub debounce_ms: u64,

    #[serde(rename = "max-active-tasks")]
    pub max_active_tasks: usize,

    /// Terminal tasks older than this are swept
    #[serde(rename = "task-retention-ms")]
    pub task_retention_ms: u64,

    #[serde(rename = "alert-capacity")]
    pub alert_capacity: usize,

    #[serde(rename = "activity-capacity")]
    pub activity_capacity: usize,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_active_tasks: DEFAULT_MAX_ACTIVE_TASKS,
            task_retention_ms: DEFAULT_TASK_RETENTION_MS,
            alert_capacity: DEFAULT_ALERT_CAPACITY,
            activity_capacity: DEFAULT_ACTIVITY_CAPACITY,
        }
    }
}

impl EmitterConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_active_tasks == 0 {
            return Err(eyre::eyre!("emitter.max-active-tasks must be at least 1"));
        }
        if self.alert_capacity == 0 || self.activity_capacity == 0 {
            return Err(eyre::eyre!("emitter alert/activity capacities must be at least 1"));
        }
        Ok(())
    }
}

/// Consumer-side durable cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Durable write debounce
    #[serde(rename = "debounce-ms")]
    pub debounce_ms: u64,

    /// Maximum age of a persisted record
    #[serde(rename = "state-ttl-ms")]
    pub state_ttl_ms: u64,

    #[serde(rename = "max-state-size-bytes")]
    pub max_state_size_bytes: usize,

    #[serde(rename = "compression-threshold-bytes")]
    pub compression_threshold_bytes: usize,

    /// Cached or received documents with more tasks than this are refused
    #[serde(rename = "max-active-tasks")]
    pub max_active_tasks: usize,

    /// Key prefix shared by sibling consumers of one user/workspace
    pub namespace: String,

    /// Directory for the file backend (defaults to the local data dir)
    #[serde(rename = "cache-dir", skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_PERSIST_DEBOUNCE_MS,
            state_ttl_ms: DEFAULT_STATE_TTL_MS,
            max_state_size_bytes: DEFAULT_MAX_STATE_SIZE_BYTES,
            compression_threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD_BYTES,
            max_active_tasks: DEFAULT_MAX_ACTIVE_TASKS,
            namespace: "default".to_string(),
            cache_dir: None,
        }
    }
}

impl PersistenceConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Configured cache directory, or `<data_local_dir>/dashsync/cache`
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("dashsync")
                .join("cache")
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_state_size_bytes == 0 {
            return Err(eyre::eyre!("persistence.max-state-size-bytes must be at least 1"));
        }
        if self.state_ttl_ms == 0 {
            return Err(eyre::eyre!("persistence.state-ttl-ms must be at least 1"));
        }
        if self.max_active_tasks == 0 {
            return Err(eyre::eyre!("persistence.max-active-tasks must be at least 1"));
        }
        if self.namespace.trim().is_empty() || self.namespace.contains(['/', '\\']) {
            return Err(eyre::eyre!("persistence.namespace must be a non-empty name without path separators"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.emitter.debounce_ms, 100);
        assert_eq!(config.persistence.debounce_ms, 1_000);
        assert_eq!(config.persistence.state_ttl_ms, 86_400_000);
        assert_eq!(config.emitter.max_active_tasks, 10);
        assert_eq!(config.emitter.task_retention_ms, 300_000);
        assert_eq!(config.persistence.max_state_size_bytes, 1_048_576);
        assert_eq!(config.persistence.compression_threshold_bytes, 51_200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
emitter:
  debounce-ms: 250
persistence:
  namespace: alice
log-level: debug
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.emitter.debounce_ms, 250);
        assert_eq!(config.emitter.max_active_tasks, DEFAULT_MAX_ACTIVE_TASKS);
        assert_eq!(config.persistence.namespace, "alice");
        assert_eq!(config.persistence.state_ttl_ms, DEFAULT_STATE_TTL_MS);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = Config::default();
        config.emitter.max_active_tasks = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_consumer_limit_below_producer() {
        let mut config = Config::default();
        config.emitter.max_active_tasks = 20;
        assert!(config.validate().is_err());
        config.persistence.max_active_tasks = 20;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_path_in_namespace() {
        let mut config = Config::default();
        config.persistence.namespace = "../escape".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_explicit_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dashsync.yml");
        let mut config = Config::default();
        config.persistence.compression_threshold_bytes = 1024;
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/dashsync.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_resolved_cache_dir_prefers_configured() {
        let config = PersistenceConfig {
            cache_dir: Some(PathBuf::from("/tmp/ds-cache")),
            ..Default::default()
        };
        assert_eq!(config.resolved_cache_dir(), PathBuf::from("/tmp/ds-cache"));
    }
}
