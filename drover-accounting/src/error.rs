//! Accounting error types.

use thiserror::Error;

/// Failure talking to the accounting bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge request timed out")]
    Timeout,

    #[error("bridge unreachable: {0}")]
    Unreachable(String),

    #[error("bridge returned status {0}")]
    Status(u16),

    #[error("bridge response malformed: {0}")]
    Decode(String),

    /// The bridge answered but flagged the pull as not ok.
    #[error("bridge rejected pull: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for BridgeError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::Decode(error.to_string())
        } else if let Some(status) = error.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Unreachable(error.to_string())
        }
    }
}

/// Failure of one poll cycle. Bridge failures leave the cursor exactly
/// as it was; store failures additionally withhold cursor advancement
/// so the batch replays.
#[derive(Debug, Error)]
pub enum PollerError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Store(#[from] drover_store::StoreError),
}
