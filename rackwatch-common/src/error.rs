use thiserror::Error;

/// Common error type for rackwatch components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid payload: {0}")]
    Payload(String),
}

/// Result type alias using rackwatch's Error.
pub type Result<T> = std::result::Result<T, Error>;
