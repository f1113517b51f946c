//! Error types for update-schedulerd

use thiserror::Error;
use update_scheduler_common::{DesiredStateError, OrchestratorError};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for the config schema
    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    /// A field failed validation
    #[error("Invalid configuration for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Daemon startup and wiring errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Orchestrator unreachable or client could not be built
    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// Desired-state source could not be constructed
    #[error("Desired state error: {0}")]
    DesiredState(#[from] DesiredStateError),
}

/// Result type for update-schedulerd operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::from(ConfigError::invalid("retry.jitter", "must be within [0, 1]"));
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid configuration for retry.jitter: must be within [0, 1]"
        );
    }

    #[test]
    fn test_orchestrator_error_display() {
        let err = SchedulerError::from(OrchestratorError::Unavailable("connection refused".into()));
        assert_eq!(
            err.to_string(),
            "Orchestrator error: orchestrator unreachable: connection refused"
        );
    }
}
