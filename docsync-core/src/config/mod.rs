//! Configuration management
//!
//! Defaults, TOML files and `DOCSYNC_*` environment overrides for the
//! reactor, the job queue, the sync manager and logging.

use crate::core_oplog::{GcVariant, ReshufflePolicy};
use crate::logging::{LogConfig, LogLevel};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Reactor configuration
    #[serde(default)]
    pub reactor: ReactorConfig,

    /// Job queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Sync manager configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Reactor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactorConfig {
    /// Branch used when a request does not name one
    pub default_branch: String,

    /// Execution retries before a job is marked failed
    pub max_retries: u32,

    /// Cache the resulting state on every Nth operation (0 disables)
    pub checkpoint_interval: u64,

    /// Replay incoming history with hash verification before appending it
    pub verify_hashes_on_load: bool,

    /// Skip protocol used by replay
    pub gc_variant: GcVariant,

    /// Reshuffle applied when a load conflicts with local history
    pub reshuffle: ReshufflePolicy,

    /// Default wait used by blocking job helpers
    #[serde(with = "humantime_serde")]
    pub job_timeout: Duration,
}

/// Job queue configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Pending jobs allowed per (document, scope, branch); 0 is unbounded
    pub max_pending_per_queue: usize,
}

/// Sync manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Delivery retries before an envelope is dead-lettered
    pub max_delivery_retries: u32,

    /// Pause between delivery attempts
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,

    /// How long counts must stay unchanged to call two replicas settled
    #[serde(with = "humantime_serde")]
    pub quiet_period: Duration,

    /// Maximum operations per envelope
    pub outbox_batch_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            default_branch: "main".to_string(),
            max_retries: 3,
            checkpoint_interval: 10,
            verify_hashes_on_load: false,
            gc_variant: GcVariant::V1,
            reshuffle: ReshufflePolicy::TimestampAndIndex,
            job_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_delivery_retries: 3,
            retry_backoff: Duration::from_millis(50),
            quiet_period: Duration::from_millis(300),
            outbox_batch_size: 256,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    /// Convert into the logging subsystem's configuration
    pub fn to_log_config(&self) -> Result<LogConfig, ConfigError> {
        let level = LogLevel::parse(&self.level)
            .ok_or_else(|| ConfigError::LogLevel(self.level.clone()))?;

        Ok(LogConfig::new(level)
            .json_format(self.json_format)
            .with_timestamp(self.with_timestamp)
            .with_target(self.with_target))
    }
}

fn env_value<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Environment { key: key.to_string(), reason: e.to_string() }),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: DOCSYNC_<SECTION>_<KEY>
    /// Example: DOCSYNC_REACTOR_MAX_RETRIES=5
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Reactor config
        if let Ok(branch) = env::var("DOCSYNC_REACTOR_DEFAULT_BRANCH") {
            config.reactor.default_branch = branch;
        }
        if let Some(retries) = env_value("DOCSYNC_REACTOR_MAX_RETRIES")? {
            config.reactor.max_retries = retries;
        }
        if let Some(interval) = env_value("DOCSYNC_REACTOR_CHECKPOINT_INTERVAL")? {
            config.reactor.checkpoint_interval = interval;
        }
        if let Some(verify) = env_value("DOCSYNC_REACTOR_VERIFY_HASHES")? {
            config.reactor.verify_hashes_on_load = verify;
        }
        if let Some(ms) = env_value::<u64>("DOCSYNC_REACTOR_JOB_TIMEOUT_MS")? {
            config.reactor.job_timeout = Duration::from_millis(ms);
        }

        // Queue config
        if let Some(max_pending) = env_value("DOCSYNC_QUEUE_MAX_PENDING")? {
            config.queue.max_pending_per_queue = max_pending;
        }

        // Sync config
        if let Some(retries) = env_value("DOCSYNC_SYNC_MAX_DELIVERY_RETRIES")? {
            config.sync.max_delivery_retries = retries;
        }
        if let Some(ms) = env_value::<u64>("DOCSYNC_SYNC_RETRY_BACKOFF_MS")? {
            config.sync.retry_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = env_value::<u64>("DOCSYNC_SYNC_QUIET_PERIOD_MS")? {
            config.sync.quiet_period = Duration::from_millis(ms);
        }
        if let Some(size) = env_value("DOCSYNC_SYNC_OUTBOX_BATCH_SIZE")? {
            config.sync.outbox_batch_size = size;
        }

        // Logging config
        if let Ok(level) = env::var("DOCSYNC_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(json) = env_value("DOCSYNC_LOG_JSON")? {
            config.logging.json_format = json;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;

        let config: Self = toml::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate reactor config
        if self.reactor.default_branch.trim().is_empty() {
            return Err(ConfigError::out_of_range("reactor", "default_branch", "must not be empty"));
        }

        if self.reactor.max_retries > 100 {
            return Err(ConfigError::out_of_range("reactor", "max_retries", "must not exceed 100"));
        }

        if self.reactor.job_timeout.is_zero() {
            return Err(ConfigError::out_of_range("reactor", "job_timeout", "must be greater than 0"));
        }

        // Validate sync config
        if self.sync.max_delivery_retries == 0 {
            return Err(ConfigError::out_of_range("sync", "max_delivery_retries", "must be greater than 0"));
        }

        if self.sync.outbox_batch_size == 0 {
            return Err(ConfigError::out_of_range("sync", "outbox_batch_size", "must be greater than 0"));
        }

        // Validate logging config
        if LogLevel::parse(&self.logging.level).is_none() {
            return Err(ConfigError::LogLevel(self.logging.level.clone()));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;

        std::fs::write(path, contents).map_err(|source| ConfigError::Write { path: path.to_path_buf(), source })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    // from_env reads every DOCSYNC_* variable
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reactor.default_branch, "main");
        assert_eq!(config.reactor.reshuffle, ReshufflePolicy::TimestampAndIndex);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.reactor.default_branch = " ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { section: "reactor", field: "default_branch", .. })
        ));

        config = Config::default();
        config.sync.max_delivery_retries = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.reactor.max_retries = 1000;
        assert!(config.validate().is_err());

        config = Config::default();
        config.sync.outbox_batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { field: "outbox_batch_size", .. })));
    }

    #[test]
    fn test_log_level_validation() {
        let mut config = Config::default();

        config.logging.level = "invalid".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::LogLevel(level)) if level == "invalid"));
        assert!(config.logging.to_log_config().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.to_log_config().unwrap().level, LogLevel::Debug);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("docsync.toml");

        let mut config = Config::default();
        config.reactor.max_retries = 7;
        config.reactor.gc_variant = GcVariant::V2;
        config.sync.retry_backoff = Duration::from_millis(250);
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.reactor.max_retries, 7);
        assert_eq!(loaded.reactor.gc_variant, GcVariant::V2);
        assert_eq!(loaded.sync.retry_backoff, Duration::from_millis(250));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[sync]\nmax_delivery_retries = 9\nretry_backoff = \"2s\"\n").unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.sync.max_delivery_retries, 9);
        assert_eq!(loaded.sync.retry_backoff, Duration::from_secs(2));
        assert_eq!(loaded.reactor.max_retries, 3);
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "reactor = 12").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse(_))));
        assert!(matches!(
            Config::from_file(dir.path().join("missing.toml")),
            Err(ConfigError::Read { path, .. }) if path.ends_with("missing.toml")
        ));
    }

    #[test]
    fn test_from_env_overrides() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        env::set_var("DOCSYNC_SYNC_MAX_DELIVERY_RETRIES", "5");
        env::set_var("DOCSYNC_REACTOR_CHECKPOINT_INTERVAL", "0");
        let config = Config::from_env().unwrap();
        env::remove_var("DOCSYNC_SYNC_MAX_DELIVERY_RETRIES");
        env::remove_var("DOCSYNC_REACTOR_CHECKPOINT_INTERVAL");

        assert_eq!(config.sync.max_delivery_retries, 5);
        assert_eq!(config.reactor.checkpoint_interval, 0);
    }

    #[test]
    fn test_from_env_rejects_unparsable_value() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        env::set_var("DOCSYNC_QUEUE_MAX_PENDING", "lots");
        let result = Config::from_env();
        env::remove_var("DOCSYNC_QUEUE_MAX_PENDING");

        assert!(matches!(result, Err(ConfigError::Environment { key, .. }) if key == "DOCSYNC_QUEUE_MAX_PENDING"));
    }
}
