//! Errors raised while loading, validating or saving a `Config`

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config cannot be encoded as TOML: {0}")]
    Encode(#[from] toml::ser::Error),

    /// A `DOCSYNC_*` variable is set but does not parse
    #[error("Environment variable {key} is invalid: {reason}")]
    Environment { key: String, reason: String },

    #[error("Unknown log level '{0}'")]
    LogLevel(String),

    /// A value outside the range the reactor or sync manager accepts
    #[error("[{section}] {field}: {reason}")]
    OutOfRange {
        section: &'static str,
        field: &'static str,
        reason: &'static str,
    },
}

impl ConfigError {
    pub(crate) fn out_of_range(section: &'static str, field: &'static str, reason: &'static str) -> Self {
        ConfigError::OutOfRange { section, field, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_offending_setting() {
        let err = ConfigError::out_of_range("sync", "outbox_batch_size", "must be greater than 0");
        assert_eq!(err.to_string(), "[sync] outbox_batch_size: must be greater than 0");

        let err = ConfigError::Environment {
            key: "DOCSYNC_REACTOR_MAX_RETRIES".to_string(),
            reason: "invalid digit found in string".to_string(),
        };
        assert!(err.to_string().starts_with("Environment variable DOCSYNC_REACTOR_MAX_RETRIES"));
    }
}
