//! Error types for the agent.

use thiserror::Error;

/// Result type alias using [`AgentError`].
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur in the agent.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// Pending queue store error.
    #[error("Storage error on {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Collector transport could not be set up.
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Wrap an I/O error on the store at `path`.
    pub fn storage(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.display().to_string(),
            source,
        }
    }
}

impl From<json5::Error> for AgentError {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

impl From<rackwatch_common::Error> for AgentError {
    fn from(err: rackwatch_common::Error) -> Self {
        Self::Config(err.to_string())
    }
}
