//! Error types for the core crate.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for calls into backend transports and the unicast fallback.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Core error types.
#[derive(Debug, Error)]
pub enum Error {
    /// A grouping id that is not `<kind>.<name>`.
    #[error("Invalid grouping id: {0}")]
    InvalidGroupingId(String),

    /// A partition key that is not `<backend>/<capability>`.
    #[error("Invalid partition key: {0}")]
    InvalidPartitionKey(String),

    /// The registry collaborator failed.
    #[error("Registry error: {0}")]
    Registry(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Failure reported by a wire-level collaborator (MQTT client, Z-Wave JS
/// client, ZHA gateway, host service bus).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The backend could not be reached or did not answer.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered and refused the request.
    #[error("Backend rejected request: {0}")]
    Rejected(String),

    /// The call did not complete in time.
    #[error("Operation timeout after {0}ms")]
    Timeout(u64),
}

impl TransportError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::Rejected(_))
    }
}
