//! Stable scheduling error abstractions.

use thiserror::Error;

/// Errors returned by a `RecordStore`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object was modified since it was read.
    #[error("the object has been modified, the update was rejected due to a version conflict")]
    Conflict,
    /// The object does not exist.
    #[error("the requested object was not found")]
    NotFound,
    /// The call did not complete before its deadline.
    #[error("timeout while interacting with the record store")]
    Timeout,
    /// Any other error from the backing store.
    #[error("record store error: {0}")]
    Backend(anyhow::Error),
}

/// Error variants of the stable scheduling protocol.
#[derive(Debug, Error)]
pub enum StableError {
    /// The scheduling record annotation holds content which could not be parsed.
    #[error("malformed scheduling record: {0}")]
    MalformedRecord(#[source] serde_json::Error),
    /// The scheduling record could not be serialized.
    #[error("error encoding scheduling record: {0}")]
    Encode(#[source] serde_json::Error),
    /// An error from the record store.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Every attempt to update the record hit a version conflict.
    #[error("failed to update scheduling record after {0} attempts due to conflicts")]
    RetriesExhausted(usize),
    /// The caller's deadline elapsed.
    #[error("the call was cancelled as its deadline elapsed")]
    Cancelled,
}

impl StableError {
    /// Check if this error is a version conflict from the record store.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(StoreError::Conflict))
    }
}
