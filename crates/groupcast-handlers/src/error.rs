//! Error types for protocol handlers.

use groupcast_core::TransportError;
use thiserror::Error;

/// Result type for handler operations.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Error type for protocol handler operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// Transient: the backend was unreachable or too slow. Retry later.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Permanent for this input: the backend refused the request.
    #[error("Backend rejected request: {0}")]
    BackendRejected(String),

    /// Every scene slot on the device is taken.
    #[error("No free scene slot on device {device}")]
    SlotExhausted { device: String },

    /// The handler cannot perform this operation at all.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl HandlerError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, HandlerError::BackendUnavailable(_))
    }
}

impl From<TransportError> for HandlerError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Unavailable(msg) => HandlerError::BackendUnavailable(msg),
            TransportError::Timeout(ms) => {
                HandlerError::BackendUnavailable(format!("timed out after {ms}ms"))
            }
            TransportError::Rejected(msg) => HandlerError::BackendRejected(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_mapping() {
        let err: HandlerError = TransportError::Timeout(250).into();
        assert!(err.is_transient());
        assert!(err.to_string().contains("250ms"));

        let err: HandlerError = TransportError::Rejected("no such device".into()).into();
        assert_eq!(err, HandlerError::BackendRejected("no such device".into()));
        assert!(!err.is_transient());
    }
}
