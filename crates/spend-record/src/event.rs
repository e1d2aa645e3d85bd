//! Raw channel events and their deduplication keys
//!
//! [`EventKey`] is the unit of idempotency. Messages with a channel-assigned
//! identifier are keyed by `(channel_id, event_id)`; messages without one are
//! keyed by a content fingerprint over `(channel_id, author_id,
//! normalized_text, time_bucket)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// A message as delivered by the channel; never mutated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Chat/group identifier
    pub channel_id: String,
    /// Channel-assigned message identifier, when the channel provides one
    #[serde(default)]
    pub event_id: Option<String>,
    /// Author identifier
    pub author_id: String,
    /// Author display name
    #[serde(default)]
    pub author_display_name: String,
    /// When the message was sent
    pub timestamp: DateTime<Utc>,
    /// Message text
    pub text: String,
}

impl RawEvent {
    /// Create an event without a channel message id
    #[must_use]
    pub fn new(
        channel_id: impl Into<String>,
        author_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            event_id: None,
            author_id: author_id.into(),
            author_display_name: String::new(),
            timestamp,
            text: text.into(),
        }
    }

    /// With channel message id
    #[inline]
    #[must_use]
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    /// With author display name
    #[inline]
    #[must_use]
    pub fn with_author_name(mut self, name: impl Into<String>) -> Self {
        self.author_display_name = name.into();
        self
    }

    /// Derive the event key; `window` is the fingerprint time bucket width
    #[inline]
    #[must_use]
    pub fn key(&self, window: Duration) -> EventKey {
        EventKey::for_event(self, window)
    }
}

/// Deterministic deduplication key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventKey(String);

impl EventKey {
    const MESSAGE_PREFIX: &'static str = "msg";
    const FINGERPRINT_PREFIX: &'static str = "fp";

    /// Key for a message with a channel-assigned id
    #[must_use]
    pub fn from_message(channel_id: &str, event_id: &str) -> Self {
        Self(format!(
            "{}:{}:{}",
            Self::MESSAGE_PREFIX,
            channel_id.trim(),
            event_id.trim()
        ))
    }

    /// Content fingerprint key for a message without an id
    ///
    /// Timestamps in the same `window`-wide bucket produce the same key.
    #[must_use]
    pub fn fingerprint(
        channel_id: &str,
        author_id: &str,
        text: &str,
        timestamp: DateTime<Utc>,
        window: Duration,
    ) -> Self {
        let window_secs = i64::try_from(window.as_secs()).unwrap_or(i64::MAX).max(1);
        let bucket = timestamp.timestamp().div_euclid(window_secs);

        let mut hasher = Sha256::new();
        hasher.update(channel_id.trim().as_bytes());
        hasher.update([0]);
        hasher.update(author_id.trim().as_bytes());
        hasher.update([0]);
        hasher.update(normalize_text(text).as_bytes());
        hasher.update([0]);
        hasher.update(bucket.to_le_bytes());
        let digest = hasher.finalize();

        Self(format!(
            "{}:{}:{}",
            Self::FINGERPRINT_PREFIX,
            channel_id.trim(),
            hex::encode(&digest[..12])
        ))
    }

    /// Key for an event, preferring its message id
    #[must_use]
    pub fn for_event(event: &RawEvent, window: Duration) -> Self {
        match event.event_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Self::from_message(&event.channel_id, id),
            _ => Self::fingerprint(
                &event.channel_id,
                &event.author_id,
                &event.text,
                event.timestamp,
                window,
            ),
        }
    }

    /// Rebuild a key from its string form
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let (prefix, rest) = s.split_once(':')?;
        let valid = (prefix == Self::MESSAGE_PREFIX || prefix == Self::FINGERPRINT_PREFIX)
            && rest.contains(':');
        valid.then(|| Self(s.to_string()))
    }

    /// Whether this key came from a content fingerprint
    #[inline]
    #[must_use]
    pub fn is_fingerprint(&self) -> bool {
        self.0.starts_with(Self::FINGERPRINT_PREFIX)
    }

    /// Channel the keyed event was sent in
    #[must_use]
    pub fn channel_id(&self) -> Option<&str> {
        let (_, rest) = self.0.split_once(':')?;
        rest.rsplit_once(':').map(|(channel, _)| channel)
    }

    /// String form
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase, drop punctuation, collapse whitespace
///
/// Currency symbols are kept: `$20` and `€20` are different purchases.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_alphanumeric() || c == '.' || is_currency_symbol(c) {
            out.extend(c.to_lowercase());
        } else {
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_currency_symbol(c: char) -> bool {
    matches!(c, '$' | '¢' | '£' | '¤' | '¥' | '\u{058F}' | '\u{060B}' | '\u{0E3F}')
        || ('\u{20A0}'..='\u{20CF}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const WINDOW: Duration = Duration::from_secs(120);

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_040 + secs, 0).unwrap()
    }

    #[test]
    fn message_key_uses_event_id() {
        let event = RawEvent::new("-100371", "999", at(0), "buy tips $20 DE").with_event_id("42");
        assert_eq!(event.key(WINDOW).as_str(), "msg:-100371:42");
        assert!(!event.key(WINDOW).is_fingerprint());
    }

    #[test]
    fn blank_event_id_falls_back_to_fingerprint() {
        let event = RawEvent::new("c", "a", at(0), "buy tips $20 DE").with_event_id("  ");
        assert!(event.key(WINDOW).is_fingerprint());
    }

    #[test]
    fn fingerprint_is_stable_within_bucket() {
        let a = RawEvent::new("c", "a", at(0), "Buy tips $20 DE");
        let b = RawEvent::new("c", "a", at(30), "buy  tips $20 DE!");
        assert_eq!(a.key(WINDOW), b.key(WINDOW));
    }

    #[test]
    fn fingerprint_separates_far_apart_purchases() {
        let a = RawEvent::new("c", "a", at(0), "buy tips $20 DE");
        let b = RawEvent::new("c", "a", at(3600), "buy tips $20 DE");
        assert_ne!(a.key(WINDOW), b.key(WINDOW));
    }

    #[test]
    fn fingerprint_separates_authors_and_channels() {
        let a = RawEvent::new("c", "a", at(0), "buy tips $20 DE");
        let b = RawEvent::new("c", "b", at(0), "buy tips $20 DE");
        let c = RawEvent::new("d", "a", at(0), "buy tips $20 DE");
        assert_ne!(a.key(WINDOW), b.key(WINDOW));
        assert_ne!(a.key(WINDOW), c.key(WINDOW));
    }

    #[test]
    fn parse_accepts_known_prefixes() {
        assert!(EventKey::parse("msg:c:1").is_some());
        assert!(EventKey::parse("fp:c:abcd").is_some());
        assert!(EventKey::parse("other:c:1").is_none());
        assert!(EventKey::parse("msg").is_none());
    }

    #[test]
    fn channel_id_survives_negative_ids() {
        let key = EventKey::from_message("-1003711269809", "77");
        assert_eq!(key.channel_id(), Some("-1003711269809"));
        let fp = RawEvent::new("c", "a", at(0), "buy tips").key(WINDOW);
        assert_eq!(fp.channel_id(), Some("c"));
    }

    #[test]
    fn normalize_collapses_noise() {
        assert_eq!(normalize_text("  Buy, TIPS!!  $20.50 "), "buy tips $20.50");
        assert_eq!(normalize_text("ÉLECTRODES €320"), "électrodes €320");
        assert_eq!(normalize_text("Ω-Pipette"), "ω pipette");
    }

    #[test]
    fn fingerprint_separates_currencies() {
        let dollars = RawEvent::new("c", "a", at(0), "buy gloves $20 DE");
        let euros = RawEvent::new("c", "a", at(0), "buy gloves €20 DE");
        let pounds = RawEvent::new("c", "a", at(0), "buy gloves £20 DE");
        assert_ne!(dollars.key(WINDOW), euros.key(WINDOW));
        assert_ne!(euros.key(WINDOW), pounds.key(WINDOW));
    }
}
