use thiserror::Error;

use crate::types::ExperimentId;

/// Transmission-provider error classification.
///
/// The retry loop keys off this split: `Retryable` and `Transport` errors
/// are retried with backoff, `Permanent` errors terminate the send on the
/// spot.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Network/transport-level failure before an HTTP status was obtained.
    /// Treated identically to a retryable provider failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Provider rejected the request transiently (429 or 5xx).
    #[error("retryable provider error (status {status:?}): {message}")]
    Retryable { status: Option<u16>, message: String },

    /// Provider rejected the request permanently (4xx other than 429).
    #[error("permanent provider error (status {status}): {message}")]
    Permanent { status: u16, message: String },
}

impl ProviderError {
    /// Whether the delivery loop may retry after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Permanent { .. })
    }
}

/// Main engine error type.
///
/// Note that transmission failures never surface here: the `Mailer` absorbs
/// them into `SendResult`. This enum covers store and lookup failures on the
/// experiment/personalization surfaces.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Storage-layer failure.
    #[error("store error: {0}")]
    Store(String),

    /// Referenced experiment does not exist.
    #[error("experiment {0} not found")]
    ExperimentNotFound(ExperimentId),

    /// Invalid configuration value.
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::Transport("connection reset".to_string()).is_retryable());
        assert!(ProviderError::Retryable {
            status: Some(503),
            message: "unavailable".to_string()
        }
        .is_retryable());
        assert!(!ProviderError::Permanent {
            status: 400,
            message: "bad address".to_string()
        }
        .is_retryable());
    }
}
