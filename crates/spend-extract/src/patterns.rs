//! Regular expressions compiled from a vocabulary
//!
//! Vocabulary-independent patterns are process-wide statics; everything that
//! depends on configured words is compiled once per [`Patterns`].

use crate::error::ExtractError;
use once_cell::sync::Lazy;
use regex::Regex;
use spend_record::{normalize_code, Category, Vocabulary};

/// Decimal number with optional thousands separators
///
/// All fraction digits are captured so `20.555` is never read as `20.55`;
/// [`crate::amount`] decides whether the value is a usable amount.
pub(crate) const NUMBER: &str = r"(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)";

/// `@user` mentions
pub(crate) static MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@\w+").expect("mention regex is valid"));

/// Trailing `note: ...` / `notes - ...` clause
pub(crate) static NOTES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\bnotes?\s*[:\-]\s*(\S.*)$").expect("notes regex is valid")
});

pub(crate) static BARE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"\b{NUMBER}\b")).expect("bare number regex is valid")
});

/// "from", "at" or "via" before a vendor name
pub(crate) static VENDOR_LEAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:from|at|via)\s+").expect("vendor regex is valid")
});

pub(crate) static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\S+").expect("token regex is valid"));

/// Vocabulary-derived patterns
#[derive(Debug, Clone)]
pub(crate) struct Patterns {
    pub(crate) trigger: Regex,
    pub(crate) symbol_amount: Option<Regex>,
    pub(crate) lone_symbol: Option<Regex>,
    pub(crate) amount_token: Option<Regex>,
    pub(crate) token_amount: Option<Regex>,
    pub(crate) currency_token: Option<Regex>,
    pub(crate) category_labels: Vec<(Category, Regex)>,
    pub(crate) category_keywords: Vec<(Category, Regex)>,
    /// Canonical code and its whole-word pattern, longest code first
    pub(crate) project_codes: Vec<(String, Regex)>,
}

impl Patterns {
    pub(crate) fn compile(vocab: &Vocabulary) -> Result<Self, ExtractError> {
        let trigger = Regex::new(&format!(r"(?i)\b(?:{})\b", words(&vocab.triggers)))
            .map_err(ExtractError::pattern("trigger"))?;

        let symbols: Vec<String> = vocab.currency_symbols.keys().cloned().collect();
        let (symbol_amount, lone_symbol) = if symbols.is_empty() {
            (None, None)
        } else {
            let alt = literals(&symbols);
            (
                Some(
                    Regex::new(&format!(r"({alt})\s*{NUMBER}"))
                        .map_err(ExtractError::pattern("currency symbol"))?,
                ),
                Some(Regex::new(&format!("(?:{alt})")).map_err(ExtractError::pattern("currency symbol"))?),
            )
        };

        let (amount_token, token_amount, currency_token) = if vocab.currency_tokens.is_empty() {
            (None, None, None)
        } else {
            let alt = words(&vocab.currency_tokens);
            let compile = |p: String| Regex::new(&p).map_err(ExtractError::pattern("currency token"));
            (
                Some(compile(format!(r"(?i)\b{NUMBER}\s*({alt})\b"))?),
                Some(compile(format!(r"(?i)\b({alt})\s*{NUMBER}\b"))?),
                Some(compile(format!(r"(?i)\b(?:{alt})\b"))?),
            )
        };

        let mut category_labels = Vec::new();
        let mut category_keywords = Vec::new();
        for table in &vocab.categories {
            if table.labels.iter().any(|w| !w.trim().is_empty()) {
                let re = Regex::new(&format!(r"(?i)\b(?:{})\b", words(&table.labels)))
                    .map_err(ExtractError::pattern("category label"))?;
                category_labels.push((table.category, re));
            }
            if table.keywords.iter().any(|w| !w.trim().is_empty()) {
                let re = Regex::new(&format!(r"(?i)\b(?:{})\b", words(&table.keywords)))
                    .map_err(ExtractError::pattern("category keyword"))?;
                category_keywords.push((table.category, re));
            }
        }

        let mut codes: Vec<&String> = vocab.project_codes.iter().collect();
        codes.sort_by_key(|c| std::cmp::Reverse(normalize_code(c).len()));
        let project_codes = codes
            .into_iter()
            .map(|code| {
                Regex::new(&format!(r"(?i)\b{}\b", phrase(code)))
                    .map(|re| (code.clone(), re))
                    .map_err(ExtractError::pattern("project code"))
            })
            .collect::<Result<_, _>>()?;

        Ok(Self {
            trigger,
            symbol_amount,
            lone_symbol,
            amount_token,
            token_amount,
            currency_token,
            category_labels,
            category_keywords,
            project_codes,
        })
    }
}

/// Escape a phrase, letting internal whitespace match any whitespace run
fn phrase(word: &str) -> String {
    word.split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+")
}

/// Alternation of phrases, longest first so "ordered" wins over "order"
fn words(list: &[String]) -> String {
    let mut list: Vec<&str> = list.iter().map(|w| w.trim()).filter(|w| !w.is_empty()).collect();
    list.sort_by_key(|w| std::cmp::Reverse(w.len()));
    list.into_iter().map(phrase).collect::<Vec<_>>().join("|")
}

/// Alternation of literal symbols, longest first
fn literals(list: &[String]) -> String {
    let mut list: Vec<&str> = list.iter().map(String::as_str).filter(|s| !s.is_empty()).collect();
    list.sort_by_key(|s| std::cmp::Reverse(s.len()));
    list.into_iter().map(regex::escape).collect::<Vec<_>>().join("|")
}
