//! Confidence-scored field values
//!
//! Every field the extractor produces carries a confidence in `[0, 1]` and a
//! provenance tag. Absence is a first-class state: a missing field has no
//! value, confidence `0.0` and no provenance.

use serde::{Deserialize, Serialize};

/// How an extracted value was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Matched a configured keyword or closed-vocabulary entry
    MatchedKeyword,
    /// Matched a structural pattern (amount, quantity, vendor phrase)
    Pattern,
    /// Inferred from leftovers or a configured default mapping
    InferredDefault,
}

/// An extracted value with confidence and provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue<T> {
    /// The value, `None` when nothing matched
    pub value: Option<T>,
    /// Confidence in `[0, 1]`; `0.0` when absent
    pub confidence: f64,
    /// Where the value came from; `None` when absent
    pub provenance: Option<Provenance>,
}

impl<T> FieldValue<T> {
    /// Absent field
    #[inline]
    #[must_use]
    pub const fn absent() -> Self {
        Self {
            value: None,
            confidence: 0.0,
            provenance: None,
        }
    }

    /// Present field (confidence is clamped into `[0, 1]`)
    #[inline]
    #[must_use]
    pub fn new(value: T, confidence: f64, provenance: Provenance) -> Self {
        Self {
            value: Some(value),
            confidence: confidence.clamp(0.0, 1.0),
            provenance: Some(provenance),
        }
    }

    /// Field matched a keyword
    #[inline]
    #[must_use]
    pub fn keyword(value: T, confidence: f64) -> Self {
        Self::new(value, confidence, Provenance::MatchedKeyword)
    }

    /// Field matched a pattern
    #[inline]
    #[must_use]
    pub fn pattern(value: T, confidence: f64) -> Self {
        Self::new(value, confidence, Provenance::Pattern)
    }

    /// Field inferred
    #[inline]
    #[must_use]
    pub fn inferred(value: T, confidence: f64) -> Self {
        Self::new(value, confidence, Provenance::InferredDefault)
    }

    /// Whether a value is present
    #[inline]
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    /// Whether a value is present with at least `min_confidence`
    #[inline]
    #[must_use]
    pub fn is_confident(&self, min_confidence: f64) -> bool {
        self.value.is_some() && self.confidence >= min_confidence
    }

    /// Borrow the value
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Keep whichever of `self` and `other` is more confident.
    ///
    /// Ties keep `self`, so callers pass the value they trust more first.
    #[must_use]
    pub fn prefer(self, other: Self) -> Self {
        match (&self.value, &other.value) {
            (None, Some(_)) => other,
            (Some(_), Some(_)) if other.confidence > self.confidence => other,
            _ => self,
        }
    }

    /// Map the inner value, keeping confidence and provenance
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FieldValue<U> {
        FieldValue {
            value: self.value.map(f),
            confidence: self.confidence,
            provenance: self.provenance,
        }
    }
}

impl<T> Default for FieldValue<T> {
    fn default() -> Self {
        Self::absent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_has_zero_confidence() {
        let f: FieldValue<String> = FieldValue::absent();
        assert!(!f.is_present());
        assert_eq!(f.confidence, 0.0);
        assert!(f.provenance.is_none());
    }

    #[test]
    fn confidence_is_clamped() {
        let f = FieldValue::pattern(1u32, 3.0);
        assert_eq!(f.confidence, 1.0);
        let f = FieldValue::pattern(1u32, -1.0);
        assert_eq!(f.confidence, 0.0);
    }

    #[test]
    fn prefer_keeps_higher_confidence() {
        let low = FieldValue::inferred("a".to_string(), 0.4);
        let high = FieldValue::keyword("b".to_string(), 0.9);
        assert_eq!(low.clone().prefer(high.clone()).get().unwrap(), "b");
        assert_eq!(high.prefer(low).get().unwrap(), "b");
    }

    #[test]
    fn prefer_tie_keeps_self() {
        let a = FieldValue::pattern("a".to_string(), 0.6);
        let b = FieldValue::pattern("b".to_string(), 0.6);
        assert_eq!(a.prefer(b).get().unwrap(), "a");
    }

    #[test]
    fn prefer_never_drops_present_for_absent() {
        let a = FieldValue::pattern("a".to_string(), 0.1);
        assert_eq!(a.prefer(FieldValue::absent()).get().unwrap(), "a");
    }

    #[test]
    fn confident_requires_threshold() {
        let f = FieldValue::inferred("x".to_string(), 0.45);
        assert!(f.is_confident(0.4));
        assert!(!f.is_confident(0.5));
    }
}
