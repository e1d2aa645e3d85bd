//! Error types for the ledger port
//!
//! Append failures are split by what the caller should do next:
//! - [`AppendError::Transient`]: retry, the same row may still succeed
//! - [`AppendError::Permanent`]: stop, the row will never be accepted as is

use std::path::PathBuf;

/// Failure writing to or reading from the ledger
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppendError {
    /// Timeout, throttling, server-side or network failure
    #[error("transient ledger failure: {0}")]
    Transient(String),

    /// Rejected request, bad credentials for good, malformed table
    #[error("permanent ledger failure: {0}")]
    Permanent(String),
}

impl AppendError {
    /// Create transient error
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    /// Create permanent error
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }

    /// Whether another attempt may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Failure class as shown to users
    #[inline]
    #[must_use]
    pub const fn class(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient failure",
            Self::Permanent(_) => "permanent failure",
        }
    }

    /// Human-readable reason without the classification prefix
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Transient(r) | Self::Permanent(r) => r,
        }
    }

    /// Classify an I/O error from a file-backed ledger
    #[must_use]
    pub fn from_io(context: &str, err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::PermissionDenied | ErrorKind::InvalidInput | ErrorKind::InvalidData => {
                Self::permanent(format!("{context}: {err}"))
            }
            _ => Self::transient(format!("{context}: {err}")),
        }
    }
}

/// Failure constructing a ledger backend
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Missing or invalid backend configuration
    #[error("ledger configuration error: {0}")]
    Config(String),

    /// I/O error preparing a file-backed ledger
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// HTTP client could not be built
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}
