//! Error types
//!
//! `StoreError` covers failures talking to the backing store.
//! `SyncError` is what synchronizer operations report to their caller.

use thiserror::Error;
use uuid::Uuid;

/// Errors returned by a [`Backend`](crate::store::Backend)
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store answered with a non-success status
    #[error("Store returned {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never completed
    #[error("Request failed: {0}")]
    Request(String),

    /// The realtime connection could not be used
    #[error("Realtime connection error: {0}")]
    Connection(String),

    /// A row from the store did not have the expected shape
    #[error("Failed to decode store response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The store is not configured or has shut down
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => StoreError::Http {
                status: status.as_u16(),
                message: error.to_string(),
            },
            None => StoreError::Request(error.to_string()),
        }
    }
}

/// Errors reported by synchronizer operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// Rejected before any remote call was made
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The target row no longer exists
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: Uuid },

    /// Network or remote failure
    #[error("Transport error: {0}")]
    Transport(#[from] StoreError),

    /// A feed payload was missing required fields
    #[error("Malformed {kind} event: {details}")]
    MalformedEvent { kind: &'static str, details: String },

    /// The synchronizer was torn down while the operation was in flight
    #[error("Synchronizer closed")]
    Closed,
}

impl SyncError {
    /// Whether the caller may simply carry on (refresh, retry, or ignore)
    ///
    /// Every error of this layer is recoverable at the call site except a
    /// closed synchronizer, whose owner has gone away.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SyncError::Closed)
    }

    /// Whether this is the benign "already gone" outcome
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound { .. })
    }

    /// Short label for user-facing notifications
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Validation(_) => "validation",
            SyncError::NotFound { .. } => "not-found",
            SyncError::Transport(_) => "transport",
            SyncError::MalformedEvent { .. } => "malformed-event",
            SyncError::Closed => "closed",
        }
    }
}

/// Result type for synchronizer operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for backend operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Trim user text and reject it if nothing is left
pub(crate) fn validate_text(text: &str, field: &str) -> SyncResult<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(SyncError::Validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_text_trims() {
        assert_eq!(validate_text("  eggs \n", "item text").unwrap(), "eggs");
    }

    #[test]
    fn test_validate_text_rejects_blank() {
        let err = validate_text("   ", "item text").unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(err.to_string().contains("item text"));
    }

    #[test]
    fn test_not_found_display() {
        let id = Uuid::nil();
        let err = SyncError::NotFound { what: "item", id };
        assert!(err.is_not_found());
        assert!(err.is_recoverable());
        assert_eq!(err.kind(), "not-found");
        assert!(err.to_string().contains("item"));
    }

    #[test]
    fn test_transport_from_store_error() {
        let err: SyncError = StoreError::Http {
            status: 503,
            message: "unavailable".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "transport");
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_closed_is_not_recoverable() {
        assert!(!SyncError::Closed.is_recoverable());
    }
}
