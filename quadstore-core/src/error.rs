//! Error types for quadstore

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the storage layer.
///
/// Caller-discipline violations (double `flush`, refback underflow, use of
/// a closed handle) are not represented here; they panic, since they
/// indicate a bug in the calling code rather than a recoverable condition.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failure propagated unchanged from the backing storage engine
    #[error("Storage error: {0}")]
    Storage(String),

    /// An observed read was invalidated by a concurrently committed change.
    /// Aborts the offending transaction only; the branch remains usable.
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        StoreError::Storage(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        StoreError::Conflict(msg.into())
    }

    /// Is this a serialization conflict?
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}
