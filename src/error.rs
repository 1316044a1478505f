//! Error types for wellness-sync

use thiserror::Error;

/// Remote store failures, classified by how callers must react.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No record for the account. Not a failure on load: seeds defaults.
    #[error("Account record not found")]
    NotFound,

    /// Connectivity-class failure, retryable on load
    #[error("Connection error: {0}")]
    Transient(String),

    #[error("Store error: {0}")]
    Permanent(String),

    /// Account already exists (registration only)
    #[error("Account already exists: {0}")]
    Duplicate(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            rusqlite::Error::SqliteFailure(ref err, _)
                if matches!(
                    err.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                StoreError::Transient(e.to_string())
            }
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Duplicate(e.to_string())
            }
            other => StoreError::Permanent(other.to_string()),
        }
    }
}

/// Generative-text collaborator failures. Always non-fatal to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(String),

    /// Response did not match the expected shape
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Errors surfaced by session operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session state is not loaded yet")]
    NotLoaded,

    /// Terminal load failure; the user must retry manually
    #[error("Load failed: {0}")]
    Load(StoreError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Rejected input, shown to the user as-is
    #[error("{0}")]
    Validation(String),

    #[error("Unknown {0}")]
    UnknownEntity(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(StoreError::Transient("reset".into()).is_retryable());
        assert!(!StoreError::NotFound.is_retryable());
        assert!(!StoreError::Permanent("denied".into()).is_retryable());
        assert!(!StoreError::Duplicate("alice".into()).is_retryable());
    }

    #[test]
    fn test_no_rows_maps_to_not_found() {
        let err: StoreError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(err, StoreError::NotFound);
    }
}
