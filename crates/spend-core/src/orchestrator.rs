//! Ingestion orchestrator
//!
//! Drives one event through the pipeline:
//!
//! 1. no trigger word and nothing pending for the author: ignored
//! 2. extract; incomplete records park in the [`ClarificationTracker`] and
//!    the author gets exactly one question
//! 3. `reserve` the event key; a committed key is answered from the store
//! 4. append with retry; `commit` on success, `fail` otherwise. A key that
//!    failed before is first looked up in the ledger, since a timed-out
//!    append may have landed
//! 5. confirm; success is only reported after the commit is durable
//!
//! The idempotency store is the only shared state that needs locking; the
//! ledger port is safe to call concurrently for distinct keys.

use crate::channel::Channel;
use crate::config::IngestConfig;
use crate::error::{ConfigError, IngestError, TrackerError};
use crate::messages;
use crate::state::{IngestState, Lifecycle};
use crate::tracker::{ClarificationHandle, ClarificationTracker, Resolution};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use spend_dedupe::{
    lookup_by_content, rebuild_from_ledger, ContentQuery, DedupeStatus, DedupeStore, ReconcileReport,
    ReserveOutcome,
};
use spend_extract::Extractor;
use spend_ledger::{AppendError, LedgerPort};
use spend_record::{CandidateRecord, Decimal, EventKey, LedgerRow, RawEvent, Receipt, RecordError, Summary};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use ulid::Ulid;

/// How one event ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Not a purchase report and no clarification pending
    Ignored,
    /// Incomplete; the author was asked for the missing fields
    ClarificationRequested(ClarificationHandle),
    /// Redelivery of a message whose question is still open
    AwaitingReply,
    /// Appended and committed
    Logged {
        /// Receipt of the append
        receipt: Receipt,
        /// What was logged
        summary: Summary,
    },
    /// The event key was already committed; nothing appended
    AlreadyLogged {
        /// Receipt of the original append
        receipt: Receipt,
        /// Summary stored with it
        summary: Option<Summary>,
    },
    /// Another worker still holds the key after the bounded wait
    DuplicateInFlight,
    /// The append failed for good; the key is marked failed
    Failed {
        /// `transient failure` or `permanent failure`
        class: String,
        /// Failure detail
        reason: String,
    },
}

/// What [`Orchestrator::recover`] did with stale reservations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Found in the ledger and committed
    pub committed: Vec<EventKey>,
    /// Not in the ledger; marked failed so a redelivery appends again
    pub failed: Vec<EventKey>,
    /// Ledger unreachable; left reserved
    pub unresolved: Vec<EventKey>,
}

/// The ingestion pipeline
pub struct Orchestrator {
    config: IngestConfig,
    extractor: Arc<Extractor>,
    tracker: ClarificationTracker,
    store: Arc<DedupeStore>,
    port: LedgerPort,
    channel: Arc<dyn Channel>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("port", &self.port)
            .field("dedupe_records", &self.store.len())
            .field("pending_clarifications", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Pipeline over an opened store and port
    ///
    /// # Errors
    /// [`ConfigError`] if the configuration or vocabulary is invalid.
    pub fn new(
        config: IngestConfig,
        store: Arc<DedupeStore>,
        port: LedgerPort,
        channel: Arc<dyn Channel>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let extractor = Arc::new(Extractor::new(config.vocabulary.clone())?);
        let tracker = ClarificationTracker::new(
            Arc::clone(&extractor),
            config.extraction.min_confidence,
            config.clarification.ttl(),
        );
        Ok(Self {
            config,
            extractor,
            tracker,
            store,
            port,
            channel,
        })
    }

    /// Open the store and ledger named in `config`
    ///
    /// # Errors
    /// [`IngestError::Config`] for bad configuration, [`IngestError::Store`]
    /// if the dedupe state cannot be read.
    pub fn from_config(config: IngestConfig, channel: Arc<dyn Channel>) -> Result<Self, IngestError> {
        let store = match &config.dedupe.state_path {
            Some(path) => DedupeStore::open(path)?,
            None => DedupeStore::in_memory(),
        };
        let port = config
            .ledger
            .build_port(&config.retry)?
            .with_verify_scan(config.dedupe.reconcile_scan);
        Ok(Self::new(config, Arc::new(store), port, channel)?)
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Idempotency store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<DedupeStore> {
        &self.store
    }

    /// Ledger port
    #[inline]
    #[must_use]
    pub fn port(&self) -> &LedgerPort {
        &self.port
    }

    /// Clarification tracker
    #[inline]
    #[must_use]
    pub fn tracker(&self) -> &ClarificationTracker {
        &self.tracker
    }

    /// Process one channel event
    ///
    /// # Errors
    /// Only failures that leave the pipeline unable to vouch for an event:
    /// a store that cannot persist, or an internal state violation. Append
    /// failures are reported to the channel and returned as
    /// [`Outcome::Failed`].
    #[instrument(
        skip_all,
        fields(run_id = %Ulid::new(), channel = %event.channel_id, author = %event.author_id)
    )]
    pub async fn handle_event(&self, event: RawEvent) -> Result<Outcome, IngestError> {
        let mut state = Lifecycle::new();
        let key = event.key(self.config.dedupe.fingerprint_window());
        let triggered = self.extractor.has_trigger(&event.text);
        let pending = self.tracker.pending(&event.channel_id, &event.author_id);

        if let Some(pending) = &pending {
            if pending.origin.key(self.config.dedupe.fingerprint_window()) == key {
                debug!(event_key = %key, "redelivered message is awaiting a reply");
                return Ok(Outcome::AwaitingReply);
            }
        }
        if !triggered && pending.is_none() {
            debug!("no purchase trigger");
            return Ok(Outcome::Ignored);
        }

        if triggered {
            if let Some(outcome) = self.answer_if_committed(&event, &key, &mut state).await? {
                return Ok(outcome);
            }
        }

        state.advance(IngestState::Extracting)?;
        let candidate = self.extractor.extract(&event.text, None);

        // A message that names no price is taken as a reply, even if it
        // contains a trigger word ("order for DE").
        let fresh_report = triggered && (pending.is_none() || candidate.amount.is_present());
        if !fresh_report {
            return self.handle_reply(&event, &mut state).await;
        }

        if let Some(handle) = self.tracker.register(&event, candidate.clone(), true)? {
            state.advance(IngestState::Clarifying)?;
            info!(event_key = %key, missing = ?handle.missing, "asking for missing fields");
            self.notify(&event.channel_id, &handle.question).await;
            return Ok(Outcome::ClarificationRequested(handle));
        }
        if pending.is_some() && self.tracker.cancel(&event.channel_id, &event.author_id) {
            debug!("complete report supersedes pending clarification");
        }
        self.log_candidate(&event, &key, &candidate, &mut state).await
    }

    async fn handle_reply(&self, event: &RawEvent, state: &mut Lifecycle) -> Result<Outcome, IngestError> {
        match self.tracker.resolve(&event.channel_id, &event.author_id, &event.text) {
            Ok(Resolution::Complete { record, origin }) => {
                let key = origin.key(self.config.dedupe.fingerprint_window());
                debug!(event_key = %key, "clarification complete");
                self.log_candidate(&origin, &key, &record, state).await
            }
            Ok(Resolution::StillIncomplete(handle)) => {
                state.advance(IngestState::Clarifying)?;
                self.notify(&event.channel_id, &handle.question).await;
                Ok(Outcome::ClarificationRequested(handle))
            }
            Err(TrackerError::NoPending { .. }) => {
                debug!("clarification expired before reply");
                Ok(Outcome::Ignored)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Redelivery of a committed message skips extraction entirely
    async fn answer_if_committed(
        &self,
        event: &RawEvent,
        key: &EventKey,
        state: &mut Lifecycle,
    ) -> Result<Option<Outcome>, IngestError> {
        let Some(record) = self.store.get(key) else {
            return Ok(None);
        };
        if record.status != DedupeStatus::Committed {
            return Ok(None);
        }
        let Some(receipt) = record.receipt else {
            return Ok(None);
        };
        state.advance(IngestState::DedupeCheck)?;
        Ok(Some(self.already_logged(event, key, receipt, record.summary, state).await?))
    }

    async fn log_candidate(
        &self,
        origin: &RawEvent,
        key: &EventKey,
        candidate: &CandidateRecord,
        state: &mut Lifecycle,
    ) -> Result<Outcome, IngestError> {
        state.advance(IngestState::DedupeCheck)?;
        let missing = candidate.missing_fields(self.config.extraction.min_confidence);
        if !missing.is_empty() {
            return Err(RecordError::Incomplete { missing }.into());
        }
        let row = LedgerRow::from_candidate(origin, key, candidate)?;
        let summary = row.summary();

        if key.is_fingerprint() && self.config.dedupe.content_lookup {
            if let Some(receipt) = self.find_resend(key, &row).await? {
                return self.already_logged(origin, key, receipt, Some(summary), state).await;
            }
        }

        let deadline = Instant::now() + self.config.dedupe.in_flight_wait();
        loop {
            match self.store.reserve(key, Some(summary.clone()))? {
                ReserveOutcome::Reserved => break,
                ReserveOutcome::AlreadyCommitted { receipt, summary } => {
                    return self.already_logged(origin, key, receipt, summary, state).await;
                }
                ReserveOutcome::AlreadyReserved => {
                    if Instant::now() >= deadline {
                        warn!(event_key = %key, state = ?state.state(), "duplicate still in flight, giving up");
                        return Ok(Outcome::DuplicateInFlight);
                    }
                    debug!(event_key = %key, "duplicate in flight, waiting");
                    tokio::time::sleep(self.config.dedupe.in_flight_poll()).await;
                }
            }
        }

        state.advance(IngestState::Appending)?;
        let appended = match self.landed_earlier(key).await {
            Ok(Some(receipt)) => Ok(receipt),
            Ok(None) => self.port.append(&row).await,
            Err(err) => Err(err),
        };
        match appended {
            Ok(receipt) => {
                self.store.commit_with_summary(key, &receipt, Some(summary.clone()))?;
                state.advance(IngestState::Committed)?;
                info!(event_key = %key, %receipt, "logged");
                self.notify(&origin.channel_id, &messages::logged(&summary, &receipt))
                    .await;
                state.advance(IngestState::Confirmed)?;
                Ok(Outcome::Logged { receipt, summary })
            }
            Err(err) => {
                state.advance(IngestState::AppendFailed)?;
                error!(
                    event_key = %key,
                    class = err.class(),
                    reason = err.reason(),
                    raw_text = %row.raw_text,
                    "append failed"
                );
                self.store.fail(key, &err.to_string())?;
                self.notify(&origin.channel_id, &messages::not_logged(&err, &row.raw_text))
                    .await;
                Ok(Outcome::Failed {
                    class: err.class().to_string(),
                    reason: err.reason().to_string(),
                })
            }
        }
    }

    /// Receipt of a row that an earlier, failed delivery of `key` left in
    /// the ledger; only checked when the key has been reserved before
    async fn landed_earlier(&self, key: &EventKey) -> Result<Option<Receipt>, AppendError> {
        if !self.store.get(key).is_some_and(|record| record.attempts > 1) {
            return Ok(None);
        }
        let found = self
            .port
            .find_by_key(key, self.config.dedupe.reconcile_scan)
            .await?;
        Ok(found.map(|stored| {
            let receipt = stored.receipt();
            info!(event_key = %key, %receipt, "earlier delivery had reached the ledger");
            receipt
        }))
    }

    async fn already_logged(
        &self,
        origin: &RawEvent,
        key: &EventKey,
        receipt: Receipt,
        summary: Option<Summary>,
        state: &mut Lifecycle,
    ) -> Result<Outcome, IngestError> {
        state.advance(IngestState::AlreadyLogged)?;
        info!(event_key = %key, %receipt, "already logged");
        self.notify(
            &origin.channel_id,
            &messages::already_logged(summary.as_ref(), &receipt),
        )
        .await;
        state.advance(IngestState::Confirmed)?;
        Ok(Outcome::AlreadyLogged { receipt, summary })
    }

    /// Ledger row of an earlier resend that landed in another fingerprint
    /// bucket; restores the key locally when found
    async fn find_resend(&self, key: &EventKey, row: &LedgerRow) -> Result<Option<Receipt>, IngestError> {
        if self.store.status(key).is_some() {
            return Ok(None);
        }
        let query = ContentQuery::around(
            row.chat_id.clone(),
            row.author_id.clone(),
            row.item.clone(),
            row.price,
            Decimal::ZERO,
            row.ts,
            self.config.dedupe.fingerprint_window(),
        );
        let found = match lookup_by_content(&self.port, key, Some(&query), self.config.dedupe.reconcile_scan).await {
            Ok(found) => found,
            Err(err) => {
                warn!(event_key = %key, error = %err, "content lookup failed, continuing");
                return Ok(None);
            }
        };
        let Some(receipt) = found else {
            return Ok(None);
        };
        info!(event_key = %key, %receipt, "matched earlier resend in the ledger");
        self.store.restore(key, &receipt, Some(row.summary()))?;
        Ok(Some(receipt))
    }

    /// Settle reservations left behind by an unclean shutdown
    ///
    /// Each stale key is looked up in the ledger, by the key in the receipt
    /// column and, when a summary was stored, by content. Found keys are
    /// committed; missing ones are failed so a redelivery appends again.
    ///
    /// # Errors
    /// [`IngestError::Store`] if the store cannot persist.
    #[instrument(skip_all)]
    pub async fn recover(&self) -> Result<RecoveryReport, IngestError> {
        let mut report = RecoveryReport::default();
        for key in self.store.stale_reservations().to_vec() {
            let Some(record) = self.store.get(&key) else {
                continue;
            };
            if record.status != DedupeStatus::Reserved {
                continue;
            }
            let query = match (&record.summary, key.channel_id()) {
                (Some(summary), Some(chat_id)) => Some(ContentQuery::around(
                    chat_id,
                    "",
                    summary.item.clone(),
                    summary.amount,
                    Decimal::ZERO,
                    record.created_at,
                    self.config.dedupe.fingerprint_window(),
                )),
                _ => None,
            };
            let scan = self.config.dedupe.reconcile_scan;
            match lookup_by_content(&self.port, &key, query.as_ref(), scan).await {
                Ok(Some(receipt)) => {
                    self.store.commit_with_summary(&key, &receipt, None)?;
                    info!(event_key = %key, %receipt, "recovered committed append");
                    report.committed.push(key);
                }
                Ok(None) => {
                    self.store.fail(&key, "interrupted before the append completed")?;
                    info!(event_key = %key, "stale reservation not in ledger, marked failed");
                    report.failed.push(key);
                }
                Err(err) => {
                    warn!(event_key = %key, error = %err, "ledger unreachable during recovery");
                    report.unresolved.push(key);
                }
            }
        }
        Ok(report)
    }

    /// Commit every ledger row the local store has lost
    ///
    /// # Errors
    /// Ledger read failures or a store that cannot persist.
    pub async fn rebuild(&self) -> Result<ReconcileReport, IngestError> {
        Ok(rebuild_from_ledger(&self.store, &self.port, self.config.dedupe.reconcile_scan).await?)
    }

    /// Drop clarifications idle past the TTL; returns how many
    pub fn expire_clarifications(&self) -> usize {
        self.tracker.expire_stale()
    }

    /// Process a batch of events
    ///
    /// Events from the same `(channel, author)` run in order, so replies
    /// follow their questions; different authors run concurrently, up to
    /// `concurrency` at a time. Results are in input order. A fatal error
    /// (the idempotency store can no longer persist) stops the whole batch:
    /// every event not yet started comes back as [`IngestError::Aborted`].
    pub async fn ingest_all(
        &self,
        events: Vec<RawEvent>,
        concurrency: usize,
    ) -> Vec<Result<Outcome, IngestError>> {
        let total = events.len();
        let mut order: Vec<(String, String)> = Vec::new();
        let mut groups: HashMap<(String, String), Vec<(usize, RawEvent)>> = HashMap::new();
        for (idx, event) in events.into_iter().enumerate() {
            let author = (event.channel_id.clone(), event.author_id.clone());
            if !groups.contains_key(&author) {
                order.push(author.clone());
            }
            groups.entry(author).or_default().push((idx, event));
        }

        let batches: Vec<Vec<(usize, RawEvent)>> =
            order.into_iter().filter_map(|author| groups.remove(&author)).collect();
        let halted = &AtomicBool::new(false);
        let finished: Vec<Vec<(usize, Result<Outcome, IngestError>)>> = stream::iter(batches)
            .map(|batch| async move {
                let mut results = Vec::with_capacity(batch.len());
                for (idx, event) in batch {
                    if halted.load(Ordering::SeqCst) {
                        results.push((idx, Err(IngestError::Aborted)));
                        continue;
                    }
                    let result = self.handle_event(event).await;
                    if let Err(err) = &result {
                        error!(error = %err, fatal = err.is_fatal(), "event not processed");
                        if err.is_fatal() {
                            halted.store(true, Ordering::SeqCst);
                        }
                    }
                    results.push((idx, result));
                }
                results
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut slots: Vec<Option<Result<Outcome, IngestError>>> = (0..total).map(|_| None).collect();
        for (idx, result) in finished.into_iter().flatten() {
            slots[idx] = Some(result);
        }
        slots.into_iter().flatten().collect()
    }

    async fn notify(&self, channel_id: &str, text: &str) {
        if let Err(err) = self.channel.send_message(channel_id, text).await {
            warn!(error = %err, "could not deliver message");
        }
    }
}
