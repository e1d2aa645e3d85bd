//! Closed vocabularies
//!
//! Trigger words, currency tokens, category keyword tables and project codes
//! are configuration rather than code so they can be relabelled without a
//! release. Defaults mirror the lab ledger the pipeline was built for.

use crate::candidate::Category;
use crate::error::RecordError;
use crate::event::normalize_text;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Keyword table for one category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTable {
    /// Category this table resolves to
    pub category: Category,
    /// Explicit category names ("consumables"); removed from item text
    #[serde(default)]
    pub labels: Vec<String>,
    /// Inference hints ("gloves", "argon"); kept in item text
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl CategoryTable {
    fn new(category: Category, labels: &[&str], keywords: &[&str]) -> Self {
        Self {
            category,
            labels: labels.iter().map(ToString::to_string).collect(),
            keywords: keywords.iter().map(ToString::to_string).collect(),
        }
    }
}

/// All closed vocabularies the extractor validates against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    /// Purchase-intent trigger words (case-insensitive, whole word)
    pub triggers: Vec<String>,
    /// Currency tokens, 2–4 ASCII letters
    pub currency_tokens: Vec<String>,
    /// Currency symbol to currency code; unmapped symbols are kept verbatim
    pub currency_symbols: BTreeMap<String, String>,
    /// Category keyword tables, in lookup order
    pub categories: Vec<CategoryTable>,
    /// Project codes (closed set)
    pub project_codes: Vec<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            triggers: ["buy", "bought", "ordered", "order", "paid", "spent", "purchased"]
                .map(String::from)
                .to_vec(),
            currency_tokens: ["AUD", "USD", "GBP", "EUR", "NZD"].map(String::from).to_vec(),
            currency_symbols: [("$", "AUD"), ("£", "GBP"), ("€", "EUR")]
                .into_iter()
                .map(|(s, c)| (s.to_string(), c.to_string()))
                .collect(),
            categories: vec![
                CategoryTable::new(
                    Category::Consumables,
                    &["consumable", "consumables"],
                    &[
                        "gloves", "tips", "pipette", "pipettes", "tube", "tubes", "falcon",
                        "filter", "filters", "vial", "vials", "kimwipe", "kimwipes",
                    ],
                ),
                CategoryTable::new(
                    Category::Equipment,
                    &["equipment", "equip"],
                    &["pump", "balance", "instrument", "power supply", "meter"],
                ),
                CategoryTable::new(
                    Category::ChemicalsAndGases,
                    &[
                        "chemicals and gases",
                        "chemicals & gases",
                        "chemical",
                        "chemicals",
                        "gases",
                    ],
                    &[
                        "co2", "n2", "argon", "hcl", "naoh", "electrolyte", "solvent", "salt",
                        "gas", "cylinder", "refill",
                    ],
                ),
            ],
            project_codes: [
                "DE",
                "DE Est",
                "KC8 CO2R",
                "KC8 pH swing",
                "ASG",
                "DP",
                "LP",
                "Startup",
                "Pursuit",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

impl Vocabulary {
    /// Check the vocabularies are usable
    ///
    /// # Errors
    /// Returns [`RecordError::InvalidVocabulary`] when triggers or project
    /// codes are empty, a currency token is not 2–4 ASCII letters, a category
    /// appears in two tables, a keyword appears in two tables, or two project
    /// codes normalize to the same string.
    pub fn validate(&self) -> Result<(), RecordError> {
        let invalid = |msg: String| Err(RecordError::InvalidVocabulary(msg));

        if self.triggers.iter().all(|t| t.trim().is_empty()) {
            return invalid("at least one trigger word is required".into());
        }
        if self.project_codes.is_empty() {
            return invalid("at least one project code is required".into());
        }
        for token in &self.currency_tokens {
            let len_ok = (2..=4).contains(&token.len());
            if !len_ok || !token.chars().all(|c| c.is_ascii_alphabetic()) {
                return invalid(format!("currency token '{token}' must be 2-4 letters"));
            }
        }

        let mut seen_categories = HashSet::new();
        let mut seen_words: BTreeMap<String, Category> = BTreeMap::new();
        for table in &self.categories {
            if !seen_categories.insert(table.category) {
                return invalid(format!("category {:?} has two tables", table.category));
            }
            for word in table.labels.iter().chain(&table.keywords) {
                let word = word.trim().to_lowercase();
                if word.is_empty() {
                    continue;
                }
                if let Some(other) = seen_words.insert(word.clone(), table.category) {
                    if other != table.category {
                        return invalid(format!(
                            "keyword '{word}' is in both {other:?} and {:?}",
                            table.category
                        ));
                    }
                }
            }
        }

        let mut seen_codes = HashSet::new();
        for code in &self.project_codes {
            let normalized = normalize_code(code);
            if normalized.is_empty() {
                return invalid("project codes must not be blank".into());
            }
            if !seen_codes.insert(normalized) {
                return invalid(format!("project code '{code}' duplicates another code"));
            }
        }
        Ok(())
    }

    /// Canonical spelling of a project code, matched case-insensitively
    #[must_use]
    pub fn canonical_project_code(&self, code: &str) -> Option<&str> {
        let wanted = normalize_code(code);
        self.project_codes
            .iter()
            .find(|c| normalize_code(c) == wanted)
            .map(String::as_str)
    }

    /// Currency code for a symbol, if mapped
    #[must_use]
    pub fn currency_for_symbol(&self, symbol: &str) -> Option<&str> {
        self.currency_symbols.get(symbol).map(String::as_str)
    }
}

/// Strip everything but letters and digits, lowercase
#[must_use]
pub fn normalize_code(code: &str) -> String {
    normalize_text(code)
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_vocabulary_is_valid() {
        Vocabulary::default().validate().unwrap();
    }

    #[test]
    fn rejects_long_currency_token() {
        let mut vocab = Vocabulary::default();
        vocab.currency_tokens.push("DOLLAR".into());
        assert!(matches!(vocab.validate(), Err(RecordError::InvalidVocabulary(_))));
    }

    #[test]
    fn rejects_overlapping_tables() {
        let mut vocab = Vocabulary::default();
        vocab.categories[1].keywords.push("gloves".into());
        let err = vocab.validate().unwrap_err();
        assert!(err.to_string().contains("gloves"));
    }

    #[test]
    fn rejects_duplicate_codes_after_normalization() {
        let mut vocab = Vocabulary::default();
        vocab.project_codes.push("kc8-co2r".into());
        assert!(vocab.validate().is_err());
    }

    #[test]
    fn canonical_code_lookup() {
        let vocab = Vocabulary::default();
        assert_eq!(vocab.canonical_project_code("pursuit"), Some("Pursuit"));
        assert_eq!(vocab.canonical_project_code("kc8 ph-swing"), Some("KC8 pH swing"));
        assert_eq!(vocab.canonical_project_code("nope"), None);
    }

    #[test]
    fn symbol_mapping() {
        let vocab = Vocabulary::default();
        assert_eq!(vocab.currency_for_symbol("$"), Some("AUD"));
        assert_eq!(vocab.currency_for_symbol("¥"), None);
    }
}
