//! Error types for the spend data model

use crate::candidate::RequiredField;

/// Data model errors
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// A row was requested for a record that is not complete
    #[error("record incomplete, missing: {}", join_fields(.missing))]
    Incomplete {
        /// Missing required fields
        missing: Vec<RequiredField>,
    },

    /// Vocabulary configuration is unusable
    #[error("invalid vocabulary: {0}")]
    InvalidVocabulary(String),

    /// A row read back from the ledger could not be parsed
    #[error("malformed ledger row: {0}")]
    MalformedRow(String),
}

fn join_fields(fields: &[RequiredField]) -> String {
    fields
        .iter()
        .map(|f| f.name())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_lists_fields() {
        let err = RecordError::Incomplete {
            missing: vec![RequiredField::Category, RequiredField::ProjectCode],
        };
        assert_eq!(
            err.to_string(),
            "record incomplete, missing: category, project_code"
        );
    }
}
