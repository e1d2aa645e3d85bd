//! Category lookup
//!
//! Explicit labels ("consumables") beat inference keywords ("gloves"); within
//! each pass the first configured table wins. Labels are consumed so they do
//! not leak into the item text, keywords are not.

use crate::patterns::Patterns;
use crate::spans::Consumed;
use spend_record::{Category, FieldValue};

const LABEL: f64 = 0.95;
const KEYWORD: f64 = 0.7;

pub(crate) fn extract(patterns: &Patterns, text: &str, consumed: &mut Consumed) -> FieldValue<Category> {
    let mut labelled = None;
    for (category, re) in &patterns.category_labels {
        for m in re.find_iter(text) {
            if consumed.overlaps(m) {
                continue;
            }
            consumed.push(m);
            labelled.get_or_insert(*category);
        }
    }
    if let Some(category) = labelled {
        return FieldValue::keyword(category, LABEL);
    }

    patterns
        .category_keywords
        .iter()
        .find(|(_, re)| re.find_iter(text).any(|m| !consumed.overlaps(m)))
        .map_or_else(FieldValue::absent, |(category, _)| {
            FieldValue::keyword(*category, KEYWORD)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use spend_record::Vocabulary;

    fn run(text: &str) -> (FieldValue<Category>, Consumed) {
        let patterns = Patterns::compile(&Vocabulary::default()).unwrap();
        let mut consumed = Consumed::default();
        (extract(&patterns, text, &mut consumed), consumed)
    }

    #[test]
    fn label_beats_keyword() {
        let (category, consumed) = run("argon cylinder for the equipment room");
        assert_eq!(category.get(), Some(&Category::Equipment));
        assert_eq!(category.confidence, 0.95);
        assert!(consumed.overlaps(crate::spans::Span::new(26, 30)));
    }

    #[test]
    fn keyword_inference() {
        let (category, consumed) = run("bought gloves");
        assert_eq!(category.get(), Some(&Category::Consumables));
        assert_eq!(category.confidence, 0.7);
        assert!(!consumed.overlaps(crate::spans::Span::new(0, 13)));
    }

    #[test]
    fn multi_word_label() {
        let (category, _) = run("paid 80 AUD chemicals & gases");
        assert_eq!(category.get(), Some(&Category::ChemicalsAndGases));
    }

    #[test]
    fn nothing_matches() {
        let (category, _) = run("bought electrodes $320");
        assert!(!category.is_present());
    }
}
