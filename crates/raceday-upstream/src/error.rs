//! Error taxonomy for the racing API client.

use std::fmt;
use std::time::Duration;

/// Errors surfaced by the upstream client.
///
/// `Transient` covers network failures, timeouts, 5xx and 429 responses;
/// the client retries these internally before surfacing. `Fatal` covers
/// every other 4xx and is never retried. `Decode` means the response body
/// could not be interpreted (bad JSON or over the size cap).
#[derive(Debug)]
pub enum UpstreamError {
    Transient {
        message: String,
        /// Server-requested delay from a 429 `Retry-After`, already clamped.
        retry_after: Option<Duration>,
    },
    Fatal {
        status: u16,
        message: String,
    },
    Decode(String),
}

impl UpstreamError {
    pub fn transient(message: impl Into<String>) -> Self {
        UpstreamError::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::Transient { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            UpstreamError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::Transient {
                message,
                retry_after: Some(d),
            } => write!(f, "transient upstream error (retry after {d:?}): {message}"),
            UpstreamError::Transient { message, .. } => {
                write!(f, "transient upstream error: {message}")
            }
            UpstreamError::Fatal { status, message } => {
                write!(f, "upstream rejected request ({status}): {message}")
            }
            UpstreamError::Decode(message) => write!(f, "upstream decode error: {message}"),
        }
    }
}

impl std::error::Error for UpstreamError {}
