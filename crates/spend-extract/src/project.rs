//! Project code matching against the closed set
//!
//! Whole-word, case-insensitive matches score 1.0, longest code first so
//! "DE Est" is not also read as "DE". Failing that, windows of one to three
//! tokens are compared after stripping punctuation ("kc8-co2r") at 0.8. Two
//! or more distinct codes leave the field absent and flag the record.

use crate::patterns::{Patterns, TOKEN};
use crate::spans::{Consumed, Span};
use spend_record::{normalize_code, FieldValue, Vocabulary};

const EXACT: f64 = 1.0;
const NEAR: f64 = 0.8;
const MAX_WINDOW: usize = 3;

/// Project code result
#[derive(Debug, Clone, Default)]
pub(crate) struct ProjectMatch {
    pub(crate) code: FieldValue<String>,
    pub(crate) ambiguous: bool,
}

pub(crate) fn extract(
    patterns: &Patterns,
    vocab: &Vocabulary,
    text: &str,
    consumed: &mut Consumed,
) -> ProjectMatch {
    let mut hits: Vec<(String, Span)> = Vec::new();
    for (code, re) in &patterns.project_codes {
        for m in re.find_iter(text) {
            let span = Span::from(m);
            if consumed.overlaps(span) || hits.iter().any(|(_, s)| s.overlaps(span)) {
                continue;
            }
            hits.push((code.clone(), span));
        }
    }
    let confidence = if hits.is_empty() {
        hits = near_matches(vocab, text, consumed);
        NEAR
    } else {
        EXACT
    };

    for (_, span) in &hits {
        consumed.push(*span);
    }

    let mut codes: Vec<String> = hits.into_iter().map(|(code, _)| code).collect();
    codes.sort();
    codes.dedup();
    match codes.as_slice() {
        [] => ProjectMatch::default(),
        [code] => ProjectMatch {
            code: FieldValue::keyword(code.clone(), confidence),
            ambiguous: false,
        },
        _ => ProjectMatch {
            code: FieldValue::absent(),
            ambiguous: true,
        },
    }
}

fn near_matches(vocab: &Vocabulary, text: &str, consumed: &Consumed) -> Vec<(String, Span)> {
    let tokens: Vec<Span> = TOKEN
        .find_iter(text)
        .map(Span::from)
        .filter(|s| !consumed.overlaps(*s))
        .collect();

    let mut hits: Vec<(String, Span)> = Vec::new();
    for width in (1..=MAX_WINDOW).rev() {
        for window in tokens.windows(width) {
            let span = Span::new(window[0].start, window[width - 1].end);
            if hits.iter().any(|(_, s)| s.overlaps(span)) {
                continue;
            }
            // Windows must be contiguous in the text, not stitched across a
            // consumed amount or label
            if consumed.overlaps(span) {
                continue;
            }
            let candidate = normalize_code(&text[span.start..span.end]);
            if candidate.is_empty() {
                continue;
            }
            if let Some(code) = vocab.canonical_project_code(&candidate) {
                hits.push((code.to_string(), span));
            }
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str) -> ProjectMatch {
        let vocab = Vocabulary::default();
        let patterns = Patterns::compile(&vocab).unwrap();
        extract(&patterns, &vocab, text, &mut Consumed::default())
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        let m = run("buy gloves 132.78 AUD pursuit consumables");
        assert_eq!(m.code.get().map(String::as_str), Some("Pursuit"));
        assert_eq!(m.code.confidence, 1.0);
        assert!(!m.ambiguous);
    }

    #[test]
    fn longest_code_wins() {
        let m = run("argon refill for DE Est");
        assert_eq!(m.code.get().map(String::as_str), Some("DE Est"));
        assert!(!m.ambiguous);
    }

    #[test]
    fn near_match_ignores_punctuation() {
        let m = run("co2 cylinder kc8-co2r $90");
        assert_eq!(m.code.get().map(String::as_str), Some("KC8 CO2R"));
        assert_eq!(m.code.confidence, 0.8);
    }

    #[test]
    fn two_codes_are_ambiguous() {
        let m = run("tips for DP or LP $20");
        assert!(!m.code.is_present());
        assert!(m.ambiguous);
    }

    #[test]
    fn repeated_code_is_not_ambiguous() {
        let m = run("Startup tips, startup budget");
        assert_eq!(m.code.get().map(String::as_str), Some("Startup"));
        assert!(!m.ambiguous);
    }

    #[test]
    fn no_code() {
        let m = run("bought electrodes $320");
        assert!(!m.code.is_present());
        assert!(!m.ambiguous);
    }
}
