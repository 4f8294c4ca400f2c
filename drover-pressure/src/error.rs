//! Error types for metrics sampling.

use thiserror::Error;

/// Failure talking to the MTA metrics endpoint.
///
/// All variants are transient from the caller's perspective: the gauge
/// and tracker degrade to their last known state rather than propagate.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// The endpoint did not answer within the configured timeout.
    #[error("metrics request timed out after {0}s")]
    Timeout(u64),

    /// Transport-level failure (connection refused, DNS, TLS).
    #[error("metrics endpoint unreachable: {0}")]
    Unreachable(String),

    /// The endpoint answered with a non-success status.
    #[error("metrics endpoint returned status {0}")]
    Status(u16),

    /// The response body could not be decoded.
    #[error("metrics response malformed: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for MetricsError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(0)
        } else if error.is_decode() {
            Self::Decode(error.to_string())
        } else if let Some(status) = error.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Unreachable(error.to_string())
        }
    }
}
