//! Error types for bucket-sync

use crate::sync::FailedItem;
use std::io::ErrorKind;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for object store calls
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors reported by an [`ObjectStore`](crate::store::ObjectStore) call
///
/// Absence of an object is part of the normal contract (`head` returns
/// `None`, `delete` returns `DeleteOutcome::NotFound`). `NotFound` here is only
/// produced by `copy` when the *source* object is gone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Transient store error: {0}")]
    Transient(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Store error: {0}")]
    Other(String),
}

impl StoreError {
    /// Network, timeout and throttling errors are eligible for retry
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_) | StoreError::Timeout(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound(e.to_string()),
            ErrorKind::PermissionDenied => StoreError::PermissionDenied(e.to_string()),
            ErrorKind::TimedOut
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::BrokenPipe => StoreError::Transient(e.to_string()),
            _ => StoreError::Other(e.to_string()),
        }
    }
}

/// A bucket could not be enumerated completely
///
/// Never recovered from inside a run: diffing against a partial listing would
/// silently skip or delete objects.
#[derive(Error, Debug, Clone)]
pub enum ListingError {
    #[error("Listing {bucket} failed on page {page} after {attempts} attempts: {source}")]
    RetriesExhausted {
        bucket: String,
        page: usize,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("Listing {bucket} failed on page {page}: {source}")]
    Fatal {
        bucket: String,
        page: usize,
        #[source]
        source: StoreError,
    },

    #[error("Listing {bucket} returned continuation token {token:?} twice")]
    CursorLoop { bucket: String, token: String },

    #[error("Listing {bucket} cancelled after {pages} pages")]
    Cancelled { bucket: String, pages: usize },
}

impl ListingError {
    pub fn bucket(&self) -> &str {
        match self {
            ListingError::RetriesExhausted { bucket, .. }
            | ListingError::Fatal { bucket, .. }
            | ListingError::CursorLoop { bucket, .. }
            | ListingError::Cancelled { bucket, .. } => bucket,
        }
    }
}

/// One or more plan items still failed after retries were exhausted
#[derive(Error, Debug, Clone)]
#[error("{} item(s) failed to apply, first: {}", .failed.len(), first_failure(.failed))]
pub struct PartialApplyFailure {
    pub failed: Vec<FailedItem>,
}

fn first_failure(failed: &[FailedItem]) -> String {
    failed
        .first()
        .map(|f| format!("{} {} ({})", f.operation, f.key, f.reason))
        .unwrap_or_default()
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Store type {0:?} is not available in this build")]
    UnsupportedStore(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{ObjectKey, Operation};

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Transient("503".into()).is_transient());
        assert!(StoreError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!StoreError::PermissionDenied("403".into()).is_transient());
        assert!(!StoreError::NotFound("k".into()).is_transient());
        assert!(!StoreError::BucketNotFound("b".into()).is_transient());
        assert!(!StoreError::Other("x".into()).is_transient());
    }

    #[test]
    fn test_io_error_mapping() {
        let e: StoreError = std::io::Error::new(ErrorKind::PermissionDenied, "nope").into();
        assert!(matches!(e, StoreError::PermissionDenied(_)));

        let e: StoreError = std::io::Error::new(ErrorKind::ConnectionReset, "reset").into();
        assert!(e.is_transient());

        let e: StoreError = std::io::Error::new(ErrorKind::NotFound, "gone").into();
        assert!(matches!(e, StoreError::NotFound(_)));
    }

    #[test]
    fn test_partial_apply_failure_display() {
        let err = PartialApplyFailure {
            failed: vec![FailedItem {
                key: ObjectKey::from("a.txt"),
                operation: Operation::Copy,
                reason: "Permission denied: a.txt".to_string(),
                attempts: 1,
            }],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("1 item(s) failed"));
        assert!(msg.contains("a.txt"));
    }

    #[test]
    fn test_listing_error_bucket() {
        let err = ListingError::Cancelled {
            bucket: "src".into(),
            pages: 3,
        };
        assert_eq!(err.bucket(), "src");
    }
}
