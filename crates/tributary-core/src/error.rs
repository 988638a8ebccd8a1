//! Upstream error taxonomy.
//!
//! Transient errors (rate limits, network timeouts) are retried close to the
//! call site by the backoff helper; what escapes it still carries the
//! distinction so orchestration can decide whether a whole enumeration is
//! worth restarting. Permanent errors are surfaced as-is.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    /// Retryable: rate limit, network timeout, 5xx.
    #[error("transient upstream error: {0}")]
    Transient(String),

    /// Fatal for this item: bad credentials, malformed payload, 4xx.
    #[error("permanent upstream error: {0}")]
    Permanent(String),
}

impl SourceError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Transient(err.to_string())
        } else {
            Self::Permanent(err.to_string())
        }
    }
}
