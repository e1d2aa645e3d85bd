//! Quantity (`2x`, `x3`, `2x500ml`, `qty: 4`, `5 boxes`)

use crate::spans::Consumed;
use once_cell::sync::Lazy;
use regex::Regex;
use spend_record::FieldValue;

const MULTIPLIER: f64 = 0.85;
const COUNTED: f64 = 0.9;

static FORMS: Lazy<Vec<(Regex, f64)>> = Lazy::new(|| {
    [
        // 2x500ml, 4 x 2.5L: the leading number is the count
        (r"(?i)\b(\d{1,4})\s*[x×]\s*\d+(?:\.\d+)?\s*[a-zμµ]{0,3}\b", MULTIPLIER),
        // 2x gloves, gloves 3 x
        (r"(?i)\b(\d{1,4})\s*[x×](?:\s|$)", MULTIPLIER),
        // gloves x2, x 3 tips
        (r"(?i)(?:^|\s)[x×]\s*(\d{1,4})\b", MULTIPLIER),
        (r"(?i)\bqty\s*[:=.]?\s*(\d{1,5})\b", COUNTED),
        (
            r"(?i)\b(\d{1,5})\s*(?:units?|pcs|pieces?|packs?|boxes|box|bottles?|cases?)\b",
            COUNTED,
        ),
    ]
    .into_iter()
    .map(|(pattern, confidence)| {
        (Regex::new(pattern).expect("quantity regex is valid"), confidence)
    })
    .collect()
});

/// First quantity phrase not already claimed by an amount
pub(crate) fn extract(text: &str, consumed: &mut Consumed) -> FieldValue<u32> {
    for (re, confidence) in FORMS.iter() {
        for caps in re.captures_iter(text) {
            let (Some(whole), Some(count)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if consumed.overlaps(whole) {
                continue;
            }
            let Ok(count) = count.as_str().parse::<u32>() else {
                continue;
            };
            if count == 0 {
                continue;
            }
            consumed.push(whole);
            return FieldValue::pattern(count, *confidence);
        }
    }
    FieldValue::absent()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spans::Span;

    fn qty(text: &str) -> Option<u32> {
        extract(text, &mut Consumed::default()).get().copied()
    }

    #[test]
    fn recognised_forms() {
        assert_eq!(qty("bought 2x gloves"), Some(2));
        assert_eq!(qty("bought gloves x3"), Some(3));
        assert_eq!(qty("ordered 4x500ml bottles"), Some(4));
        assert_eq!(qty("tips qty: 10"), Some(10));
        assert_eq!(qty("5 boxes of tips"), Some(5));
    }

    #[test]
    fn words_starting_with_x_are_not_quantities() {
        assert_eq!(qty("bought 1 xylene bottle $30"), None);
    }

    #[test]
    fn claimed_spans_are_skipped() {
        let mut consumed = Consumed::default();
        consumed.push(Span::new(0, 9));
        assert!(!extract("10 boxes!", &mut consumed).is_present());
    }
}
