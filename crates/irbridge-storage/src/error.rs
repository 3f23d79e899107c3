//! Error types for the storage crate.

use thiserror::Error;

pub use irbridge_core::error::Error as CoreError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Storage error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Reading a seed file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row or seed file is not valid JSON for its record type.
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Any redb failure: open, lock, transaction, table or commit.
    #[error("Database error: {0}")]
    Database(String),

    /// A seeded appliance names a controller missing from the seed.
    #[error("Appliance {appliance_id} references unknown controller {controller_id}")]
    UnknownController {
        appliance_id: String,
        controller_id: String,
    },
}

impl From<Error> for CoreError {
    fn from(e: Error) -> Self {
        match e {
            Error::Json(e) => CoreError::Serialization(e.to_string()),
            Error::UnknownController { .. } => CoreError::Validation(e.to_string()),
            Error::Io(_) | Error::Database(_) => CoreError::Storage(e.to_string()),
        }
    }
}

macro_rules! database_error {
    ($($source:ty),+ $(,)?) => {
        $(
            impl From<$source> for Error {
                fn from(e: $source) -> Self {
                    Error::Database(e.to_string())
                }
            }
        )+
    };
}

database_error!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);
