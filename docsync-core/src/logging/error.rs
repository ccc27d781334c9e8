//! Errors from installing the tracing subscriber or reading a log level

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum LoggingError {
    /// `try_init` refused: another global subscriber owns the process
    #[error("Tracing subscriber already installed: {0}")]
    SubscriberInstalled(String),

    #[error("Unknown log level '{0}' (expected trace, debug, info, warn or error)")]
    UnknownLevel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_level_lists_accepted_names() {
        let err = LoggingError::UnknownLevel("loud".to_string());
        assert_eq!(err.to_string(), "Unknown log level 'loud' (expected trace, debug, info, warn or error)");
    }
}
