//! Extractor construction errors
//!
//! Extraction itself never fails: missing or unrecognised fields come back as
//! absent values. Only building an [`crate::Extractor`] from a vocabulary can
//! go wrong.

use spend_record::RecordError;

/// Errors building an extractor
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// Vocabulary failed validation
    #[error(transparent)]
    Vocabulary(#[from] RecordError),

    /// A vocabulary entry produced a pattern the regex engine rejected
    #[error("invalid {what} pattern: {source}")]
    Pattern {
        what: &'static str,
        #[source]
        source: regex::Error,
    },
}

impl ExtractError {
    pub(crate) fn pattern(what: &'static str) -> impl FnOnce(regex::Error) -> Self {
        move |source| Self::Pattern { what, source }
    }
}
