//! The extractor façade

use crate::error::ExtractError;
use crate::patterns::{Patterns, MENTION};
use crate::spans::Consumed;
use crate::{amount, category, item, project, quantity};
use spend_record::{CandidateRecord, Vocabulary};

/// Turns message text into a [`CandidateRecord`]
///
/// Extraction is pure: the same text (and prior record) always yields the
/// same candidate. Absent fields are reported, never guessed.
#[derive(Debug, Clone)]
pub struct Extractor {
    vocab: Vocabulary,
    patterns: Patterns,
}

impl Extractor {
    /// Build an extractor for a validated vocabulary
    ///
    /// # Errors
    /// Returns [`ExtractError`] if the vocabulary is invalid.
    pub fn new(vocab: Vocabulary) -> Result<Self, ExtractError> {
        vocab.validate()?;
        let patterns = Patterns::compile(&vocab)?;
        Ok(Self { vocab, patterns })
    }

    /// Extractor over the built-in lab vocabulary
    ///
    /// # Errors
    /// Only fails if the built-in vocabulary is broken.
    pub fn with_defaults() -> Result<Self, ExtractError> {
        Self::new(Vocabulary::default())
    }

    /// Vocabulary in use
    #[inline]
    #[must_use]
    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Whether the text contains a purchase trigger word
    #[must_use]
    pub fn has_trigger(&self, text: &str) -> bool {
        self.patterns.trigger.is_match(text)
    }

    /// Extract a candidate from `text`, merging with `prior` when the text is
    /// a clarification reply
    #[must_use]
    pub fn extract(&self, text: &str, prior: Option<&CandidateRecord>) -> CandidateRecord {
        match prior {
            None => self.extract_text(text),
            Some(prior) => self.merge(prior, text),
        }
    }

    fn extract_text(&self, text: &str) -> CandidateRecord {
        let vocab = &self.vocab;
        let patterns = &self.patterns;
        let mut consumed = Consumed::default();

        for m in MENTION.find_iter(text) {
            consumed.push(m);
        }
        for m in patterns.trigger.find_iter(text) {
            consumed.push(m);
        }

        let notes = item::notes(text, &mut consumed);
        let (mut amount, mut currency) = amount::monetary(patterns, vocab, text, &mut consumed);
        let quantity = quantity::extract(text, &mut consumed);
        if !currency.is_present() {
            currency = amount::currency_evidence(patterns, vocab, text, &mut consumed);
            if currency.is_present() {
                amount = amount::bare_amount(text, &mut consumed);
            }
        }
        let category = category::extract(patterns, text, &mut consumed);
        let project = project::extract(patterns, vocab, text, &mut consumed);
        let vendor = item::vendor(vocab, text, &mut consumed);
        let item = item::item(patterns, vocab, text, &consumed);

        CandidateRecord {
            item,
            amount,
            currency,
            category,
            project_code: project.code,
            quantity,
            vendor,
            notes,
            ambiguous_project_code: project.ambiguous,
            source_text: text.to_string(),
        }
    }

    /// Merge a clarification reply into a prior candidate
    ///
    /// Three readings compete field by field: the prior record, the reply on
    /// its own, and the prior text with the reply appended. The reply alone is
    /// what lets "Pursuit" settle an ambiguous project code that the combined
    /// text would still see twice. On equal confidence the prior value stays.
    fn merge(&self, prior: &CandidateRecord, reply: &str) -> CandidateRecord {
        let combined_text = format!("{} {}", prior.source_text.trim(), reply.trim());
        let reply_only = self.extract_text(reply);
        let combined = self.extract_text(&combined_text);

        let project_code = prior
            .project_code
            .clone()
            .prefer(reply_only.project_code)
            .prefer(combined.project_code);
        let ambiguous_project_code = !project_code.is_present()
            && (prior.ambiguous_project_code
                || reply_only.ambiguous_project_code
                || combined.ambiguous_project_code);

        CandidateRecord {
            item: prior.item.clone().prefer(reply_only.item).prefer(combined.item),
            amount: prior.amount.clone().prefer(reply_only.amount).prefer(combined.amount),
            currency: prior
                .currency
                .clone()
                .prefer(reply_only.currency)
                .prefer(combined.currency),
            category: prior
                .category
                .clone()
                .prefer(reply_only.category)
                .prefer(combined.category),
            project_code,
            quantity: prior
                .quantity
                .clone()
                .prefer(reply_only.quantity)
                .prefer(combined.quantity),
            vendor: prior.vendor.clone().prefer(reply_only.vendor).prefer(combined.vendor),
            notes: prior.notes.clone().prefer(reply_only.notes).prefer(combined.notes),
            ambiguous_project_code,
            source_text: combined_text,
        }
    }
}
