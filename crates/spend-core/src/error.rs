//! Error types for the ingestion pipeline
//!
//! Only append failures ever reach users, as a "Not logged" message; the
//! errors here are for operators:
//! - [`ConfigError`]: bad configuration, refuse to start
//! - [`TrackerError`]: clarification slot misuse, handled internally
//! - [`ChannelError`]: a message could not be delivered
//! - [`IngestError`]: anything that stops an event mid-pipeline

use crate::state::IngestState;
use spend_dedupe::DedupeError;
use spend_extract::ExtractError;
use spend_ledger::LedgerError;
use spend_record::RecordError;
use std::path::PathBuf;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for [`crate::IngestConfig`]
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range or inconsistent
    #[error("invalid config: {0}")]
    Invalid(String),

    /// Vocabulary rejected by the extractor
    #[error(transparent)]
    Vocabulary(#[from] ExtractError),

    /// Ledger backend could not be built
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Clarification tracker errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    /// No live pending clarification for this author
    #[error("no pending clarification for {author_id} in {channel_id}")]
    NoPending { channel_id: String, author_id: String },

    /// A pending clarification exists and the new message did not supersede it
    #[error("clarification already pending for {author_id} in {channel_id}")]
    NotTriggered { channel_id: String, author_id: String },
}

/// Channel delivery errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    /// The transport refused or lost the message
    #[error("send to {channel_id} failed: {reason}")]
    Send { channel_id: String, reason: String },
}

/// Pipeline errors
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Idempotency store failure; fatal for I/O and corruption
    #[error("idempotency store: {0}")]
    Store(#[from] DedupeError),

    /// A record passed the completeness check but could not become a row
    #[error("record: {0}")]
    Record(#[from] RecordError),

    /// Internal state machine violation
    #[error("illegal ingest transition {from:?} -> {to:?}")]
    IllegalTransition { from: IngestState, to: IngestState },

    /// Clarification slot misuse
    #[error("clarification: {0}")]
    Tracker(#[from] TrackerError),

    /// Startup configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Skipped because an earlier event in the batch hit a fatal error
    #[error("not processed after an earlier fatal error")]
    Aborted,
}

impl IngestError {
    /// Whether the process should stop taking events
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Store(e) => e.is_fatal(),
            Self::Config(_) | Self::IllegalTransition { .. } => true,
            Self::Record(_) | Self::Tracker(_) | Self::Aborted => false,
        }
    }
}
