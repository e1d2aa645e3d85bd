//! Clarification tracker
//!
//! Holds at most one incomplete candidate per `(channel_id, author_id)`
//! while the bot waits for the author to fill in the missing fields.
//!
//! Slots live in a [`DashMap`]; `register`, `resolve` and `cancel` go
//! through the entry API, so operations on one author's slot are atomic
//! with respect to each other while different authors never contend.
//! Waiting is stored state, never an awaited future.

use crate::error::TrackerError;
use crate::messages::clarification_question;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use spend_extract::Extractor;
use spend_record::{CandidateRecord, RawEvent, RequiredField};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

type SlotKey = (String, String);

/// What the author is being asked for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationHandle {
    /// Chat the question goes to
    pub channel_id: String,
    /// Author the question is for
    pub author_id: String,
    /// Fields still missing, in question order
    pub missing: Vec<RequiredField>,
    /// Several project codes matched
    pub ambiguous_project_code: bool,
    /// Question text
    pub question: String,
}

/// Result of [`ClarificationTracker::resolve`]
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The reply completed the record; the slot is now empty
    Complete {
        /// Merged record
        record: CandidateRecord,
        /// Message the purchase was first reported in
        origin: RawEvent,
    },
    /// Still missing fields; the slot keeps the merged record
    StillIncomplete(ClarificationHandle),
}

/// Snapshot of a pending slot
#[derive(Debug, Clone, PartialEq)]
pub struct PendingClarification {
    /// Message the purchase was first reported in
    pub origin: RawEvent,
    /// Merged record so far
    pub candidate: CandidateRecord,
    /// Outstanding question
    pub handle: ClarificationHandle,
}

#[derive(Debug)]
struct Slot {
    origin: RawEvent,
    candidate: CandidateRecord,
    handle: ClarificationHandle,
    touched: Instant,
}

impl Slot {
    fn is_live(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.touched) < ttl
    }
}

/// Per-author pending clarifications
#[derive(Debug)]
pub struct ClarificationTracker {
    slots: DashMap<SlotKey, Slot>,
    extractor: Arc<Extractor>,
    min_confidence: f64,
    ttl: Duration,
}

impl ClarificationTracker {
    /// Tracker merging replies with `extractor`
    #[must_use]
    pub fn new(extractor: Arc<Extractor>, min_confidence: f64, ttl: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            extractor,
            min_confidence,
            ttl,
        }
    }

    /// Pending entry lifetime
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start waiting on `candidate` if it is incomplete
    ///
    /// Returns `None` for a complete candidate. A live pending entry is only
    /// replaced when the new message was `triggered` by a purchase word.
    ///
    /// # Errors
    /// [`TrackerError::NotTriggered`] if a live entry exists and the message
    /// was not a fresh purchase report.
    pub fn register(
        &self,
        origin: &RawEvent,
        candidate: CandidateRecord,
        triggered: bool,
    ) -> Result<Option<ClarificationHandle>, TrackerError> {
        let missing = candidate.missing_fields(self.min_confidence);
        if missing.is_empty() {
            return Ok(None);
        }
        let handle = self.handle_for(origin, &candidate, missing);
        let slot = Slot {
            origin: origin.clone(),
            candidate,
            handle: handle.clone(),
            touched: Instant::now(),
        };

        match self.slots.entry(slot_key(&origin.channel_id, &origin.author_id)) {
            Entry::Occupied(mut entry) => {
                if !triggered && entry.get().is_live(self.ttl, Instant::now()) {
                    return Err(TrackerError::NotTriggered {
                        channel_id: origin.channel_id.clone(),
                        author_id: origin.author_id.clone(),
                    });
                }
                debug!(author = %origin.author_id, "replacing pending clarification");
                entry.insert(slot);
            }
            Entry::Vacant(entry) => {
                entry.insert(slot);
            }
        }
        Ok(Some(handle))
    }

    /// Merge `reply` into the author's pending record
    ///
    /// # Errors
    /// [`TrackerError::NoPending`] if there is no live entry; an expired one
    /// is dropped.
    pub fn resolve(&self, channel_id: &str, author_id: &str, reply: &str) -> Result<Resolution, TrackerError> {
        let no_pending = || TrackerError::NoPending {
            channel_id: channel_id.to_string(),
            author_id: author_id.to_string(),
        };
        let Entry::Occupied(mut entry) = self.slots.entry(slot_key(channel_id, author_id)) else {
            return Err(no_pending());
        };
        let now = Instant::now();
        if !entry.get().is_live(self.ttl, now) {
            entry.remove();
            debug!(author = %author_id, "pending clarification expired");
            return Err(no_pending());
        }

        let merged = self.extractor.extract(reply, Some(&entry.get().candidate));
        let missing = merged.missing_fields(self.min_confidence);
        if missing.is_empty() {
            let slot = entry.remove();
            return Ok(Resolution::Complete {
                record: merged,
                origin: slot.origin,
            });
        }

        let slot = entry.get_mut();
        slot.handle = self.handle_for(&slot.origin, &merged, missing);
        slot.candidate = merged;
        slot.touched = now;
        Ok(Resolution::StillIncomplete(slot.handle.clone()))
    }

    /// Drop the author's pending entry; `true` if there was one
    pub fn cancel(&self, channel_id: &str, author_id: &str) -> bool {
        self.slots.remove(&slot_key(channel_id, author_id)).is_some()
    }

    /// Live pending entry for the author
    #[must_use]
    pub fn pending(&self, channel_id: &str, author_id: &str) -> Option<PendingClarification> {
        let slot = self.slots.get(&slot_key(channel_id, author_id))?;
        slot.is_live(self.ttl, Instant::now()).then(|| PendingClarification {
            origin: slot.origin.clone(),
            candidate: slot.candidate.clone(),
            handle: slot.handle.clone(),
        })
    }

    /// Drop entries idle for `ttl` or longer; returns how many
    pub fn expire(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.is_live(ttl, now));
        let dropped = before.saturating_sub(self.slots.len());
        if dropped > 0 {
            debug!(dropped, "expired pending clarifications");
        }
        dropped
    }

    /// [`Self::expire`] with the configured TTL
    pub fn expire_stale(&self) -> usize {
        self.expire(self.ttl)
    }

    /// Number of entries, live or not yet swept
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no entries are held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn handle_for(
        &self,
        origin: &RawEvent,
        candidate: &CandidateRecord,
        missing: Vec<RequiredField>,
    ) -> ClarificationHandle {
        let ambiguous = candidate.ambiguous_project_code;
        ClarificationHandle {
            channel_id: origin.channel_id.clone(),
            author_id: origin.author_id.clone(),
            question: clarification_question(&missing, ambiguous, self.extractor.vocabulary()),
            missing,
            ambiguous_project_code: ambiguous,
        }
    }
}

fn slot_key(channel_id: &str, author_id: &str) -> SlotKey {
    (channel_id.to_string(), author_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    const TTL: Duration = Duration::from_secs(900);

    fn tracker() -> ClarificationTracker {
        let extractor = Arc::new(Extractor::with_defaults().unwrap());
        ClarificationTracker::new(extractor, 0.4, TTL)
    }

    fn event(text: &str) -> RawEvent {
        RawEvent::new("c", "alice", Utc::now(), text).with_event_id("1")
    }

    fn register(tracker: &ClarificationTracker, text: &str, triggered: bool) -> Result<Option<ClarificationHandle>, TrackerError> {
        let candidate = tracker.extractor.extract(text, None);
        tracker.register(&event(text), candidate, triggered)
    }

    #[test]
    fn complete_candidate_is_not_registered() {
        let t = tracker();
        let handle = register(&t, "buy gloves 132.78 AUD Pursuit consumables", true).unwrap();
        assert!(handle.is_none());
        assert!(t.is_empty());
    }

    #[test]
    fn incomplete_candidate_gets_one_question() {
        let t = tracker();
        let handle = register(&t, "bought electrodes $320", true).unwrap().unwrap();
        assert_eq!(handle.missing, vec![RequiredField::Category, RequiredField::ProjectCode]);
        assert!(handle.question.contains("category"));
        assert!(handle.question.contains("project_code"));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn untriggered_message_cannot_replace_pending() {
        let t = tracker();
        register(&t, "bought electrodes $320", true).unwrap();
        let err = register(&t, "tips $20", false).unwrap_err();
        assert!(matches!(err, TrackerError::NotTriggered { .. }));
        assert!(register(&t, "bought tips $20", true).unwrap().is_some());
        let pending = t.pending("c", "alice").unwrap();
        assert_eq!(pending.origin.text, "bought tips $20");
    }

    #[test]
    fn reply_completes_and_clears_slot() {
        let t = tracker();
        register(&t, "bought electrodes $320", true).unwrap();
        let Resolution::Complete { record, origin } = t.resolve("c", "alice", "equipment DE").unwrap() else {
            panic!("expected complete");
        };
        assert_eq!(record.project_code.get().map(String::as_str), Some("DE"));
        assert_eq!(origin.text, "bought electrodes $320");
        assert!(t.is_empty());
    }

    #[test]
    fn partial_reply_keeps_slot_and_asks_again() {
        let t = tracker();
        register(&t, "bought electrodes $320", true).unwrap();
        let Resolution::StillIncomplete(handle) = t.resolve("c", "alice", "equipment").unwrap() else {
            panic!("expected incomplete");
        };
        assert_eq!(handle.missing, vec![RequiredField::ProjectCode]);
        assert!(matches!(
            t.resolve("c", "alice", "Pursuit").unwrap(),
            Resolution::Complete { .. }
        ));
    }

    #[test]
    fn resolve_without_pending() {
        let t = tracker();
        assert!(matches!(
            t.resolve("c", "bob", "equipment"),
            Err(TrackerError::NoPending { .. })
        ));
    }

    #[test]
    fn slots_are_per_author() {
        let t = tracker();
        register(&t, "bought electrodes $320", true).unwrap();
        assert!(t.pending("c", "bob").is_none());
        assert!(t.pending("d", "alice").is_none());
        assert!(t.cancel("c", "alice"));
        assert!(!t.cancel("c", "alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let t = tracker();
        register(&t, "bought electrodes $320", true).unwrap();
        tokio::time::advance(TTL - Duration::from_secs(1)).await;
        assert!(t.pending("c", "alice").is_some());
        assert_eq!(t.expire_stale(), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(t.pending("c", "alice").is_none());
        assert!(matches!(
            t.resolve("c", "alice", "equipment DE"),
            Err(TrackerError::NoPending { .. })
        ));
        assert!(t.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reply_refreshes_ttl() {
        let t = tracker();
        register(&t, "bought electrodes $320", true).unwrap();
        tokio::time::advance(Duration::from_secs(600)).await;
        t.resolve("c", "alice", "equipment").unwrap();
        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(t.pending("c", "alice").is_some());
        assert_eq!(t.expire(Duration::from_secs(60)), 1);
    }
}
