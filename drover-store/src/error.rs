//! Store error types.

use thiserror::Error;

/// Failure in the durable row store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("row encoding failed: {0}")]
    Encode(String),

    #[error("row {0} is corrupt: {1}")]
    Corrupt(String, String),

    /// Counter increment against a job that has no row.
    #[error("no row for job {0}")]
    RowNotFound(String),

    /// Writes administratively or artificially disabled (used by the
    /// in-memory backend to exercise at-least-once replay paths).
    #[error("store is rejecting writes")]
    WritesUnavailable,

    #[error("invalid store path: {0}")]
    InvalidPath(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::Encode(error.to_string())
    }
}
