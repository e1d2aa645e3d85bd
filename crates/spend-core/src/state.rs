//! Per-event ingestion state machine
//!
//! ```text
//! Received -> Extracting -> Clarifying <-> Extracting
//!                        -> DedupeCheck -> AlreadyLogged -> Confirmed
//!                                       -> Appending -> Committed -> Confirmed
//!                                                    -> AppendFailed
//! ```
//!
//! `Committed -> Confirmed` is the only way to a success confirmation.

use crate::error::IngestError;
use serde::{Deserialize, Serialize};

/// Where an event is in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    /// Event accepted from the channel
    Received,
    /// Running the extractor
    Extracting,
    /// Waiting for a clarification reply
    Clarifying,
    /// Reserving the event key
    DedupeCheck,
    /// Key already committed; no append
    AlreadyLogged,
    /// Writing to the ledger
    Appending,
    /// Row written and key committed
    Committed,
    /// Append failed for good; key marked failed
    AppendFailed,
    /// Confirmation sent
    Confirmed,
}

impl IngestState {
    /// States with no way out
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        allowed_transitions(self).is_empty()
    }
}

/// Check a transition against the table
///
/// # Errors
/// [`IngestError::IllegalTransition`] for anything not in the table.
pub fn validate_transition(from: IngestState, to: IngestState) -> Result<(), IngestError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(IngestError::IllegalTransition { from, to })
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: IngestState) -> &'static [IngestState] {
    use IngestState::*;
    match from {
        Received => &[Extracting, DedupeCheck],
        Extracting => &[Clarifying, DedupeCheck],
        Clarifying => &[Extracting],
        DedupeCheck => &[AlreadyLogged, Appending],
        AlreadyLogged => &[Confirmed],
        Appending => &[Committed, AppendFailed],
        Committed => &[Confirmed],
        AppendFailed | Confirmed => &[],
    }
}

/// Current state of one event, with transition checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Lifecycle(IngestState);

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self(IngestState::Received)
    }

    pub(crate) fn state(self) -> IngestState {
        self.0
    }

    pub(crate) fn advance(&mut self, to: IngestState) -> Result<(), IngestError> {
        validate_transition(self.0, to)?;
        tracing::trace!(from = ?self.0, ?to, "ingest transition");
        self.0 = to;
        Ok(())
    }
}
