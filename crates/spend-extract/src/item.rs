//! Free-text fields: notes, vendor and the item itself
//!
//! The item is whatever is left once every recognised phrase has been
//! blanked out, with filler words trimmed from both ends.

use crate::patterns::{Patterns, NOTES, TOKEN, VENDOR_LEAD};
use crate::spans::{Consumed, Span};
use spend_record::{FieldValue, Vocabulary};

const NOTES_CONFIDENCE: f64 = 0.9;
const VENDOR_CONFIDENCE: f64 = 0.7;
const SHORT_ITEM: f64 = 0.6;
const LONG_ITEM: f64 = 0.45;
const SHORT_ITEM_WORDS: usize = 4;
const MAX_VENDOR_WORDS: usize = 3;

/// Words that never start or end an item
const FILLER: &[&str] = &[
    "a", "about", "an", "and", "at", "by", "each", "for", "from", "i", "in", "is", "it",
    "it's", "its", "me", "my", "of", "on", "or", "our", "project", "category", "some", "the",
    "to", "total", "via", "was", "we", "with",
];

pub(crate) fn notes(text: &str, consumed: &mut Consumed) -> FieldValue<String> {
    let Some(caps) = NOTES.captures(text) else {
        return FieldValue::absent();
    };
    let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
        return FieldValue::absent();
    };
    consumed.push(whole);
    let body = body.as_str().trim();
    if body.is_empty() {
        FieldValue::absent()
    } else {
        FieldValue::pattern(body.to_string(), NOTES_CONFIDENCE)
    }
}

/// Capitalised words after "from", "at" or "via"
pub(crate) fn vendor(
    vocab: &Vocabulary,
    text: &str,
    consumed: &mut Consumed,
) -> FieldValue<String> {
    for lead in VENDOR_LEAD.find_iter(text) {
        if consumed.overlaps(lead) {
            continue;
        }
        let mut words: Vec<&str> = Vec::new();
        let mut end = lead.end();
        for token in TOKEN.find_iter(&text[lead.end()..]) {
            let span = Span::new(lead.end() + token.start(), lead.end() + token.end());
            // Tokens must follow each other directly
            if text[end..span.start].chars().any(|c| !c.is_whitespace()) {
                break;
            }
            let word = token.as_str().trim_end_matches([',', ';', '.', '!', '?', ':']);
            let capitalised = word.chars().next().is_some_and(char::is_uppercase);
            let is_currency = vocab.currency_tokens.iter().any(|t| t.eq_ignore_ascii_case(word));
            if !capitalised || is_currency || consumed.overlaps(span) || words.len() == MAX_VENDOR_WORDS {
                break;
            }
            words.push(word);
            end = span.end;
            if word.len() != token.as_str().len() {
                break;
            }
        }
        if words.is_empty() {
            continue;
        }
        consumed.push(Span::new(lead.start(), end));
        return FieldValue::pattern(words.join(" "), VENDOR_CONFIDENCE);
    }
    FieldValue::absent()
}

/// Item text from everything not yet consumed
pub(crate) fn item(
    patterns: &Patterns,
    vocab: &Vocabulary,
    text: &str,
    consumed: &Consumed,
) -> FieldValue<String> {
    let mut leftover = consumed.blank_out(text);
    if let Some(re) = &patterns.currency_token {
        leftover = re.replace_all(&leftover, " ").into_owned();
    }
    for symbol in vocab.currency_symbols.keys() {
        leftover = leftover.replace(symbol.as_str(), " ");
    }

    let words: Vec<&str> = leftover
        .split_whitespace()
        .filter(|w| {
            let has_letter = w.chars().any(char::is_alphabetic);
            let has_digit = w.chars().any(|c| c.is_ascii_digit());
            has_letter || !has_digit
        })
        .collect();

    let is_filler = |w: &str| {
        let w = w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'');
        w.is_empty() || FILLER.iter().any(|f| f.eq_ignore_ascii_case(w))
    };
    let start = words.iter().position(|w| !is_filler(w));
    let end = words.iter().rposition(|w| !is_filler(w));
    let (Some(start), Some(end)) = (start, end) else {
        return FieldValue::absent();
    };

    let item = words[start..=end]
        .join(" ")
        .trim_matches(|c: char| c.is_whitespace() || ",;:-.".contains(c))
        .to_string();
    if !item.chars().any(char::is_alphabetic) {
        return FieldValue::absent();
    }
    let confidence = if end - start < SHORT_ITEM_WORDS {
        SHORT_ITEM
    } else {
        LONG_ITEM
    };
    FieldValue::inferred(item, confidence)
}
