//! Error types for the storage crate.

use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A mapping record could not be encoded or decoded.
    #[error("Malformed mapping record: {0}")]
    Record(String),

    /// The embedded database failed.
    #[error("Database error ({op}): {message}")]
    Database { op: &'static str, message: String },

    /// Record written with a different envelope version.
    #[error("Unsupported record version {found} for '{key}' (supported: {supported})")]
    UnsupportedVersion {
        key: String,
        found: u32,
        supported: u32,
    },

    /// Unknown backend type or invalid backend options.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A blocking store task panicked or was cancelled.
    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Record(e.to_string())
    }
}

macro_rules! database_error {
    ($($ty:ty => $op:literal),+ $(,)?) => {
        $(
            impl From<$ty> for Error {
                fn from(e: $ty) -> Self {
                    Error::Database { op: $op, message: e.to_string() }
                }
            }
        )+
    };
}

database_error! {
    redb::Error => "redb",
    redb::DatabaseError => "open",
    redb::TransactionError => "transaction",
    redb::TableError => "table",
    redb::StorageError => "storage",
    redb::CommitError => "commit",
}
