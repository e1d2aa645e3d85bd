//! Error types for the idempotency store

use spend_ledger::AppendError;
use spend_record::{EventKey, Receipt};
use std::path::PathBuf;

/// Idempotency store errors
#[derive(Debug, thiserror::Error)]
pub enum DedupeError {
    /// Reading or writing the store file failed
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The store file exists but cannot be parsed; refusing to start empty
    #[error("idempotency store {path} is corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    /// Commit or fail for a key that holds no reservation
    #[error("event {0} is not reserved")]
    NotReserved(EventKey),

    /// Commit with a receipt different from the one already recorded
    #[error("event {key} already committed with receipt {existing}, refusing {attempted}")]
    ReceiptMismatch {
        key: EventKey,
        existing: Receipt,
        attempted: Receipt,
    },

    /// Attempt to mark a committed event as failed
    #[error("event {0} is already committed")]
    AlreadyCommitted(EventKey),

    /// Ledger lookup during reconciliation failed
    #[error("ledger lookup failed: {0}")]
    Ledger(#[from] AppendError),
}

impl DedupeError {
    /// Errors after which the store must not be trusted to keep running
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Corrupted { .. })
    }
}
