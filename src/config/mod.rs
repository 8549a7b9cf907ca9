//! Checkpoint engine configuration
//!
//! Options use the kebab-case names of the connector configuration
//! (`state-store`, `state-type`, `unsynced-state-max-age`, ...). Durations are
//! written in humantime form (`500ms`, `10s`). Configuration can be loaded from
//! TOML or YAML and overridden with `CHECKPOINT_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CheckpointError, CheckpointResult};

/// Lower bound for the derived forced-sync check interval
const MIN_SYNC_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Main checkpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CheckpointConfig {
    /// Consumer group; namespaces every store key
    pub group_id: String,

    /// Store registry key (`memory`, `file`, `redis`)
    #[serde(default = "default_state_store")]
    pub state_store: String,

    /// Codec registry key; the JSON codec is used when unset
    #[serde(default)]
    pub state_type: Option<String>,

    /// Interval of the periodic flush of dirty partitions
    #[serde(with = "humantime_serde", default = "default_auto_commit_interval")]
    pub auto_commit_interval: Duration,

    /// Maximum age of unsynced state before a forced persist; `0s` disables
    #[serde(with = "humantime_serde", default = "default_unsynced_state_max_age")]
    pub unsynced_state_max_age: Option<Duration>,

    /// Interval of the forced-sync check, derived from the max age when unset
    #[serde(with = "humantime_serde", default)]
    pub sync_check_interval: Option<Duration>,

    /// Upper bound for a single store call
    #[serde(with = "humantime_serde", default = "default_store_timeout")]
    pub store_timeout: Duration,

    /// How long shutdown waits for in-flight records before the final flush
    #[serde(with = "humantime_serde", default = "default_graceful_shutdown_timeout")]
    pub graceful_shutdown_timeout: Duration,

    #[serde(default)]
    pub redis: RedisStoreConfig,

    #[serde(default)]
    pub file: FileStoreConfig,
}

/// Redis store connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RedisStoreConfig {
    #[serde(default = "default_redis_connection_string")]
    pub connection_string: String,

    /// Connections kept in the pool
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,

    /// Operations allowed to wait for a pooled connection
    #[serde(default = "default_max_waiting_handlers")]
    pub max_waiting_handlers: usize,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            connection_string: default_redis_connection_string(),
            max_pool_size: default_max_pool_size(),
            max_waiting_handlers: default_max_waiting_handlers(),
        }
    }
}

/// File store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileStoreConfig {
    /// Root directory for checkpoint documents
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

// Default value functions for serde
fn default_state_store() -> String {
    "memory".to_string()
}

fn default_auto_commit_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_unsynced_state_max_age() -> Option<Duration> {
    Some(Duration::from_secs(10))
}

fn default_store_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_graceful_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_redis_connection_string() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_max_pool_size() -> usize {
    6
}

fn default_max_waiting_handlers() -> usize {
    24
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".checkpoint-commit").join("state"))
        .unwrap_or_else(|| PathBuf::from(".checkpoint-commit").join("state"))
}

impl CheckpointConfig {
    /// Configuration with defaults for the given consumer group
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            state_store: default_state_store(),
            state_type: None,
            auto_commit_interval: default_auto_commit_interval(),
            unsynced_state_max_age: default_unsynced_state_max_age(),
            sync_check_interval: None,
            store_timeout: default_store_timeout(),
            graceful_shutdown_timeout: default_graceful_shutdown_timeout(),
            redis: RedisStoreConfig::default(),
            file: FileStoreConfig::default(),
        }
    }

    pub fn from_toml_str(content: &str) -> CheckpointResult<Self> {
        toml::from_str(content)
            .map_err(|e| CheckpointError::configuration(format!("Invalid TOML config: {}", e)))
    }

    pub fn from_yaml_str(content: &str) -> CheckpointResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| CheckpointError::configuration(format!("Invalid YAML config: {}", e)))
    }

    /// Load from a `.toml`, `.yml` or `.yaml` file, apply environment
    /// overrides and validate
    pub async fn load(path: &Path) -> CheckpointResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            CheckpointError::configuration(format!(
                "Failed to read config {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yml") | Some("yaml") => Self::from_yaml_str(&content)?,
            Some("toml") => Self::from_toml_str(&content)?,
            other => {
                return Err(CheckpointError::configuration(format!(
                    "Unsupported config format {:?} for {}",
                    other,
                    path.display()
                )))
            }
        };

        config.merge_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CHECKPOINT_*` environment overrides
    pub fn merge_env_vars(&mut self) -> CheckpointResult<()> {
        self.merge_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn merge_env_from<F>(&mut self, lookup: F) -> CheckpointResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(group_id) = lookup("CHECKPOINT_GROUP_ID") {
            self.group_id = group_id;
        }
        if let Some(store) = lookup("CHECKPOINT_STATE_STORE") {
            self.state_store = store;
        }
        if let Some(state_type) = lookup("CHECKPOINT_STATE_TYPE") {
            self.state_type = Some(state_type);
        }
        if let Some(value) = lookup("CHECKPOINT_AUTO_COMMIT_INTERVAL") {
            self.auto_commit_interval = parse_duration("CHECKPOINT_AUTO_COMMIT_INTERVAL", &value)?;
        }
        if let Some(value) = lookup("CHECKPOINT_UNSYNCED_STATE_MAX_AGE") {
            self.unsynced_state_max_age = Some(parse_duration(
                "CHECKPOINT_UNSYNCED_STATE_MAX_AGE",
                &value,
            )?);
        }
        if let Some(url) = lookup("CHECKPOINT_REDIS_CONNECTION_STRING") {
            self.redis.connection_string = url;
        }
        if let Some(dir) = lookup("CHECKPOINT_FILE_STATE_DIR") {
            self.file.state_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> CheckpointResult<()> {
        if self.group_id.trim().is_empty() {
            return Err(CheckpointError::configuration("group-id must not be empty"));
        }
        if self.state_store.trim().is_empty() {
            return Err(CheckpointError::configuration(
                "state-store must name a store implementation",
            ));
        }
        if self.auto_commit_interval.is_zero() {
            return Err(CheckpointError::configuration(
                "auto-commit-interval must be greater than zero",
            ));
        }
        if self.store_timeout.is_zero() {
            return Err(CheckpointError::configuration(
                "store-timeout must be greater than zero",
            ));
        }
        if self.redis.max_pool_size == 0 {
            return Err(CheckpointError::configuration(
                "redis.max-pool-size must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Forced-sync threshold, `None` when disabled
    pub fn max_unsynced_age(&self) -> Option<Duration> {
        self.unsynced_state_max_age.filter(|age| !age.is_zero())
    }

    /// Interval at which stale partitions are checked
    pub fn effective_sync_check_interval(&self) -> Option<Duration> {
        let max_age = self.max_unsynced_age()?;
        let interval = self.sync_check_interval.unwrap_or_else(|| {
            (max_age / 4)
                .max(MIN_SYNC_CHECK_INTERVAL)
                .min(self.auto_commit_interval)
        });
        Some(interval.max(MIN_SYNC_CHECK_INTERVAL))
    }
}

fn parse_duration(name: &str, value: &str) -> CheckpointResult<Duration> {
    humantime_serde::re::humantime::parse_duration(value)
        .map_err(|e| CheckpointError::configuration(format!("{}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = CheckpointConfig::new("group");
        assert_eq!(config.state_store, "memory");
        assert_eq!(config.state_type, None);
        assert_eq!(config.auto_commit_interval, Duration::from_secs(5));
        assert_eq!(config.max_unsynced_age(), Some(Duration::from_secs(10)));
        assert_eq!(config.redis.max_pool_size, 6);
        assert_eq!(config.redis.max_waiting_handlers, 24);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_parsing() {
        let config = CheckpointConfig::from_toml_str(
            r#"
            group-id = "orders"
            state-store = "redis"
            state-type = "json"
            auto-commit-interval = "500ms"
            unsynced-state-max-age = "600ms"

            [redis]
            connection-string = "redis://cache:6379"
            max-pool-size = 30
            max-waiting-handlers = 1024
            "#,
        )
        .unwrap();

        assert_eq!(config.group_id, "orders");
        assert_eq!(config.state_store, "redis");
        assert_eq!(config.state_type.as_deref(), Some("json"));
        assert_eq!(config.auto_commit_interval, Duration::from_millis(500));
        assert_eq!(config.max_unsynced_age(), Some(Duration::from_millis(600)));
        assert_eq!(config.redis.connection_string, "redis://cache:6379");
        assert_eq!(config.redis.max_pool_size, 30);
        assert_eq!(config.redis.max_waiting_handlers, 1024);
    }

    #[test]
    fn test_yaml_parsing() {
        let config = CheckpointConfig::from_yaml_str(
            "group-id: g\nstate-store: file\nfile:\n  state-dir: /tmp/ckpt\n",
        )
        .unwrap();
        assert_eq!(config.state_store, "file");
        assert_eq!(config.file.state_dir, PathBuf::from("/tmp/ckpt"));
        assert_eq!(config.auto_commit_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_group_id_is_rejected() {
        assert!(CheckpointConfig::from_toml_str("state-store = \"memory\"").is_err());
        assert!(CheckpointConfig::new("  ").validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CHECKPOINT_STATE_STORE", "redis"),
            ("CHECKPOINT_UNSYNCED_STATE_MAX_AGE", "2s"),
            ("CHECKPOINT_REDIS_CONNECTION_STRING", "redis://other:6380"),
        ]
        .into_iter()
        .collect();

        let mut config = CheckpointConfig::new("group");
        config
            .merge_env_from(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.state_store, "redis");
        assert_eq!(config.max_unsynced_age(), Some(Duration::from_secs(2)));
        assert_eq!(config.redis.connection_string, "redis://other:6380");
    }

    #[test]
    fn test_env_override_with_bad_duration() {
        let mut config = CheckpointConfig::new("group");
        let result = config.merge_env_from(|name| {
            (name == "CHECKPOINT_AUTO_COMMIT_INTERVAL").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(CheckpointError::Configuration(_))));
    }

    #[test]
    fn test_zero_max_age_disables_forced_sync() {
        let mut config = CheckpointConfig::new("group");
        config.unsynced_state_max_age = Some(Duration::ZERO);
        assert_eq!(config.max_unsynced_age(), None);
        assert_eq!(config.effective_sync_check_interval(), None);
    }

    #[test]
    fn test_sync_check_interval_derivation() {
        let mut config = CheckpointConfig::new("group");
        config.auto_commit_interval = Duration::from_millis(500);
        config.unsynced_state_max_age = Some(Duration::from_millis(600));
        assert_eq!(
            config.effective_sync_check_interval(),
            Some(Duration::from_millis(150))
        );

        config.unsynced_state_max_age = Some(Duration::from_secs(60));
        assert_eq!(
            config.effective_sync_check_interval(),
            Some(Duration::from_millis(500))
        );

        config.sync_check_interval = Some(Duration::from_millis(1));
        assert_eq!(
            config.effective_sync_check_interval(),
            Some(MIN_SYNC_CHECK_INTERVAL)
        );
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.toml");
        tokio::fs::write(&path, "group-id = \"from-file\"\n")
            .await
            .unwrap();

        let config = CheckpointConfig::load(&path).await.unwrap();
        assert_eq!(config.group_id, "from-file");

        let bad = dir.path().join("checkpoint.ini");
        tokio::fs::write(&bad, "x").await.unwrap();
        assert!(CheckpointConfig::load(&bad).await.is_err());
    }
}
