//! Common error types for VVC
//!
//! Upstream failures are classified into typed kinds so callers can
//! pattern-match retry policy instead of string-matching messages.

use thiserror::Error;

/// Common result type for VVC operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across VVC crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transient upstream failure (rate limit, timeout, 5xx); retryable
    #[error("Transient error: {0}")]
    Transient(String),

    /// All API keys or quota exhausted; pauses discovery rather than retrying
    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    /// On-disk state is malformed; phase-fatal, never papered over
    #[error("Data corruption: {0}")]
    DataCorruption(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// True when every available API key is exhausted.
    pub fn is_quota(&self) -> bool {
        matches!(self, Error::QuotaExhausted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::Transient("timeout".into()).is_transient());
        assert!(!Error::Transient("timeout".into()).is_quota());
        assert!(Error::QuotaExhausted("all keys".into()).is_quota());
        assert!(!Error::DataCorruption("bad json".into()).is_transient());
    }
}
