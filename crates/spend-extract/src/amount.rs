//! Amount and currency
//!
//! Monetary phrases are tried strongest first:
//! - symbol then number (`$320`): amount 1.0, currency from the symbol map
//! - number then token (`132.78 AUD`): 0.95
//! - token then number (`AUD 132.78`): 0.9
//!
//! A bare number is only taken as the amount when the message carries other
//! currency evidence and exactly one such number is left.
//!
//! Amounts with more than two significant decimal places (`$20.555`) are
//! rejected rather than truncated, so the author is asked for the amount.

use crate::patterns::{Patterns, BARE_NUMBER};
use crate::spans::{Consumed, Span};
use spend_record::{Decimal, FieldValue, Vocabulary};
use std::str::FromStr;

const SYMBOL_AMOUNT: f64 = 1.0;
const SYMBOL_CURRENCY_MAPPED: f64 = 0.9;
const SYMBOL_CURRENCY_VERBATIM: f64 = 0.85;
const AMOUNT_THEN_TOKEN: f64 = 0.95;
const TOKEN_THEN_AMOUNT: f64 = 0.9;
const BARE_AMOUNT: f64 = 0.6;
const CURRENCY_EVIDENCE: f64 = 0.8;
const MAX_DECIMALS: u32 = 2;

#[derive(Debug, Clone)]
struct Monetary {
    span: Span,
    amount: FieldValue<Decimal>,
    currency: FieldValue<String>,
}

/// Explicit monetary phrases; consumes every phrase it recognises
pub(crate) fn monetary(
    patterns: &Patterns,
    vocab: &Vocabulary,
    text: &str,
    consumed: &mut Consumed,
) -> (FieldValue<Decimal>, FieldValue<String>) {
    let mut found: Vec<Monetary> = Vec::new();

    if let Some(re) = &patterns.symbol_amount {
        for caps in re.captures_iter(text) {
            let (Some(whole), Some(symbol), Some(number)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            let Some(amount) = parse_amount(number.as_str()) else {
                continue;
            };
            let currency = match vocab.currency_for_symbol(symbol.as_str()) {
                Some(code) => FieldValue::inferred(code.to_string(), SYMBOL_CURRENCY_MAPPED),
                None => FieldValue::pattern(symbol.as_str().to_string(), SYMBOL_CURRENCY_VERBATIM),
            };
            push(&mut found, consumed, whole.into(), FieldValue::pattern(amount, SYMBOL_AMOUNT), currency);
        }
    }

    // (regex, capture index of number, capture index of token, confidence)
    let token_forms = [
        (&patterns.amount_token, 1, 2, AMOUNT_THEN_TOKEN),
        (&patterns.token_amount, 2, 1, TOKEN_THEN_AMOUNT),
    ];
    for (re, number_idx, token_idx, confidence) in token_forms {
        let Some(re) = re else { continue };
        for caps in re.captures_iter(text) {
            let (Some(whole), Some(number), Some(token)) =
                (caps.get(0), caps.get(number_idx), caps.get(token_idx))
            else {
                continue;
            };
            let Some(amount) = parse_amount(number.as_str()) else {
                continue;
            };
            push(
                &mut found,
                consumed,
                whole.into(),
                FieldValue::pattern(amount, confidence),
                FieldValue::pattern(token.as_str().to_ascii_uppercase(), confidence),
            );
        }
    }

    for m in &found {
        consumed.push(m.span);
    }

    let best = found
        .iter()
        .fold(None::<&Monetary>, |best, m| match best {
            Some(b) if b.amount.confidence >= m.amount.confidence => Some(b),
            _ => Some(m),
        });
    let Some(best) = best else {
        return (FieldValue::absent(), FieldValue::absent());
    };

    // Two different amounts in one message: ask rather than guess
    let distinct = found.iter().any(|m| m.amount.get() != best.amount.get());
    let amount = if distinct {
        FieldValue::absent()
    } else {
        best.amount.clone()
    };
    (amount, best.currency.clone())
}

/// Record a monetary match, merging it into an overlapping one
/// (`$20 AUD` is one phrase, with the token refining the currency)
fn push(
    found: &mut Vec<Monetary>,
    consumed: &Consumed,
    span: Span,
    amount: FieldValue<Decimal>,
    currency: FieldValue<String>,
) {
    if consumed.overlaps(span) {
        return;
    }
    if let Some(existing) = found.iter_mut().find(|m| m.span.overlaps(span)) {
        if existing.amount.get() == amount.get() {
            existing.currency = existing.currency.clone().prefer(currency);
            existing.span = Span::new(existing.span.start.min(span.start), existing.span.end.max(span.end));
        }
        return;
    }
    found.push(Monetary { span, amount, currency });
}

/// Currency named without an attached number (`... 45 AUD`, `paid in €`)
pub(crate) fn currency_evidence(
    patterns: &Patterns,
    vocab: &Vocabulary,
    text: &str,
    consumed: &mut Consumed,
) -> FieldValue<String> {
    if let Some(m) = patterns
        .currency_token
        .as_ref()
        .and_then(|re| re.find_iter(text).find(|m| !consumed.overlaps(*m)))
    {
        consumed.push(m);
        return FieldValue::keyword(m.as_str().to_ascii_uppercase(), CURRENCY_EVIDENCE);
    }
    if let Some(m) = patterns
        .lone_symbol
        .as_ref()
        .and_then(|re| re.find_iter(text).find(|m| !consumed.overlaps(*m)))
    {
        consumed.push(m);
        let currency = vocab.currency_for_symbol(m.as_str()).unwrap_or(m.as_str());
        return FieldValue::inferred(currency.to_string(), CURRENCY_EVIDENCE);
    }
    FieldValue::absent()
}

/// The single unclaimed number in the text, if there is exactly one
pub(crate) fn bare_amount(text: &str, consumed: &mut Consumed) -> FieldValue<Decimal> {
    let candidates: Vec<regex::Match<'_>> = BARE_NUMBER
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .filter(|m| !consumed.overlaps(*m))
        .collect();
    let [only] = candidates[..] else {
        return FieldValue::absent();
    };
    match parse_amount(only.as_str()) {
        Some(amount) => {
            consumed.push(only);
            FieldValue::inferred(amount, BARE_AMOUNT)
        }
        None => FieldValue::absent(),
    }
}

/// Parse `1,234.50` style numbers verbatim (no rounding); `None` for more
/// than two significant decimal places
pub(crate) fn parse_amount(s: &str) -> Option<Decimal> {
    let amount = Decimal::from_str(&s.replace(',', "")).ok()?;
    (amount.normalize().scale() <= MAX_DECIMALS).then_some(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str) -> (FieldValue<Decimal>, FieldValue<String>) {
        let vocab = Vocabulary::default();
        let patterns = Patterns::compile(&vocab).unwrap();
        monetary(&patterns, &vocab, text, &mut Consumed::default())
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn symbol_amount_is_strongest() {
        let (amount, currency) = run("bought electrodes $320");
        assert_eq!(amount.get(), Some(&dec("320")));
        assert_eq!(amount.confidence, 1.0);
        assert_eq!(currency.get().map(String::as_str), Some("AUD"));
    }

    #[test]
    fn amount_then_token() {
        let (amount, currency) = run("buy gloves 132.78 aud Pursuit");
        assert_eq!(amount.get(), Some(&dec("132.78")));
        assert_eq!(amount.confidence, 0.95);
        assert_eq!(currency.get().map(String::as_str), Some("AUD"));
    }

    #[test]
    fn token_then_amount() {
        let (amount, currency) = run("paid USD 1,250.00 for a pump");
        assert_eq!(amount.get(), Some(&dec("1250.00")));
        assert_eq!(amount.confidence, 0.9);
        assert_eq!(currency.get().map(String::as_str), Some("USD"));
    }

    #[test]
    fn explicit_token_refines_symbol() {
        let (amount, currency) = run("paid $20 USD");
        assert_eq!(amount.get(), Some(&dec("20")));
        assert_eq!(currency.get().map(String::as_str), Some("USD"));
    }

    #[test]
    fn distinct_amounts_leave_amount_absent() {
        let (amount, currency) = run("bought tips $20 and tubes $35");
        assert!(!amount.is_present());
        assert!(currency.is_present());
    }

    #[test]
    fn amounts_keep_their_precision() {
        let (amount, _) = run("spent 40.50 GBP");
        assert_eq!(amount.get().map(ToString::to_string).as_deref(), Some("40.50"));
    }

    #[test]
    fn sub_cent_amounts_are_rejected_not_truncated() {
        let (amount, _) = run("buy gloves $20.555 DE");
        assert!(!amount.is_present());
        let (amount, _) = run("buy gloves 1,250.125 AUD");
        assert!(!amount.is_present());

        assert_eq!(parse_amount("20.555"), None);
        assert_eq!(parse_amount("20.500"), Some(dec("20.500")));
        assert_eq!(parse_amount("1,250.10"), Some(dec("1250.10")));
    }

    #[test]
    fn bare_number_needs_a_single_candidate() {
        let mut consumed = Consumed::default();
        assert_eq!(bare_amount("gloves 45 AUD", &mut consumed).get(), Some(&dec("45")));
        let mut consumed = Consumed::default();
        assert!(!bare_amount("gloves 45 or 50", &mut consumed).is_present());
    }
}
