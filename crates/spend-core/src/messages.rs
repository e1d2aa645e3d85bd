//! User-facing texts
//!
//! Success is only ever reported with a receipt. Failures always name their
//! class.

use spend_ledger::AppendError;
use spend_record::{Category, Receipt, RequiredField, Summary, Vocabulary};
use std::fmt::Write;

/// Confirmation for a fresh append
#[must_use]
pub fn logged(summary: &Summary, receipt: &Receipt) -> String {
    format!("Logged: {summary} (receipt {receipt})")
}

/// Confirmation for a replay of a committed event
#[must_use]
pub fn already_logged(summary: Option<&Summary>, receipt: &Receipt) -> String {
    match summary {
        Some(summary) => format!("Already logged: {summary} (receipt {receipt})"),
        None => format!("Already logged (receipt {receipt})"),
    }
}

/// Failure report; the original text is echoed so nothing is lost
#[must_use]
pub fn not_logged(err: &AppendError, raw_text: &str) -> String {
    let mut text = format!("Not logged ({}): {}", err.class(), err.reason());
    let raw_text = raw_text.trim();
    if !raw_text.is_empty() {
        let _ = write!(text, "\nOriginal message: {raw_text}");
    }
    text
}

/// The single question asked for an incomplete record
#[must_use]
pub fn clarification_question(
    missing: &[RequiredField],
    ambiguous_project_code: bool,
    vocabulary: &Vocabulary,
) -> String {
    let names: Vec<&str> = missing.iter().map(|f| f.name()).collect();
    let mut text = format!("Need a bit more to log this. Missing: {}.", names.join(", "));
    for field in missing {
        let hint = match field {
            RequiredField::Item => "what was bought".to_string(),
            RequiredField::Amount => "the total price, e.g. 132.78".to_string(),
            RequiredField::Currency => format!("one of {}", vocabulary.currency_tokens.join(", ")),
            RequiredField::Category => {
                let labels: Vec<&str> = Category::ALL.iter().map(|c| c.label()).collect();
                format!("one of {}", labels.join(", "))
            }
            RequiredField::ProjectCode if ambiguous_project_code => format!(
                "several codes matched, reply with exactly one of {}",
                vocabulary.project_codes.join(", ")
            ),
            RequiredField::ProjectCode => {
                format!("one of {}", vocabulary.project_codes.join(", "))
            }
        };
        let _ = write!(text, "\n- {}: {hint}", field.name());
    }
    text
}
