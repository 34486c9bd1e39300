//! Error types for the orchestrator.

use groupcast_core::GroupingId;
use thiserror::Error;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Failures that abort a whole operation.
///
/// Per-key backend failures are not errors at this level; they are reported
/// in the operation's report instead.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The configuration could not be read or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The registry collaborator failed to answer.
    #[error("Registry error: {0}")]
    Registry(groupcast_core::Error),

    /// Writing the mapping failed. The pass's result was discarded.
    #[error("Failed to persist mapping for {grouping}: {source}")]
    Persist {
        grouping: GroupingId,
        #[source]
        source: groupcast_storage::Error,
    },

    /// Opening or reading the mapping store failed.
    #[error("Store error: {0}")]
    Store(#[from] groupcast_storage::Error),

    /// The change intake is no longer accepting signals.
    #[error("Change intake closed")]
    IntakeClosed,

    /// The change intake is at capacity.
    #[error("Change intake full")]
    IntakeFull,
}

impl From<groupcast_core::Error> for OrchestratorError {
    fn from(e: groupcast_core::Error) -> Self {
        match e {
            groupcast_core::Error::Config(message) => OrchestratorError::Config(message),
            groupcast_core::Error::Io(e) => OrchestratorError::Config(e.to_string()),
            other => OrchestratorError::Registry(other),
        }
    }
}

impl OrchestratorError {
    pub fn persist(grouping: &GroupingId, source: groupcast_storage::Error) -> Self {
        OrchestratorError::Persist {
            grouping: grouping.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_not_registry_errors() {
        let err: OrchestratorError = groupcast_core::Error::Config("bad timeout".into()).into();
        assert!(matches!(&err, OrchestratorError::Config(m) if m == "bad timeout"));
        assert_eq!(err.to_string(), "Configuration error: bad timeout");

        let err: OrchestratorError = groupcast_core::Error::Registry("bus down".into()).into();
        assert!(matches!(err, OrchestratorError::Registry(_)));
    }
}
