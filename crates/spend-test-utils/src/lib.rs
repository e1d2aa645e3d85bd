//! Testing utilities for the spendlog workspace
//!
//! Fixtures, a channel that records what it was sent, and a ledger that
//! fails on a script.

#![allow(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use spend_core::{Channel, ChannelError, IngestConfig, Orchestrator};
use spend_dedupe::DedupeStore;
use spend_ledger::{AppendError, LedgerPort, LedgerStore, MemoryLedger, RetryPolicy, StoredRow};
use spend_record::{LedgerRow, RawEvent};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const CHAT: &str = "-1003711269809";
pub const AUTHOR: &str = "999";
pub const TABLE: &str = "SpendLog";

/// Fixed clock for reproducible fingerprints
pub fn ts(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 30, 6, 59, 0).unwrap() + chrono::Duration::seconds(offset_secs)
}

/// Message with a channel id, from the default author
pub fn message(event_id: &str, text: &str) -> RawEvent {
    RawEvent::new(CHAT, AUTHOR, ts(0), text)
        .with_event_id(event_id)
        .with_author_name("Haowei Zhang")
}

/// Message with a channel id, from `author`
pub fn message_from(author: &str, event_id: &str, text: &str) -> RawEvent {
    RawEvent::new(CHAT, author, ts(0), text).with_event_id(event_id)
}

/// Message without a channel id, sent `offset_secs` after the fixed clock
pub fn unkeyed(offset_secs: i64, text: &str) -> RawEvent {
    RawEvent::new(CHAT, AUTHOR, ts(offset_secs), text)
}

/// Retry policy with short backoff, for tests on paused time
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_initial_backoff(Duration::from_millis(10))
        .with_request_timeout(Duration::from_millis(500))
}

/// Defaults with fast retries and a short in-flight wait
pub fn test_config() -> IngestConfig {
    IngestConfig::new()
        .with_retry(fast_retry())
        .with_in_flight_wait(Duration::from_millis(200), Duration::from_millis(20))
}

/// Channel that keeps every message it is asked to send
#[derive(Debug, Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel whose sends always fail (after recording)
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// `(channel_id, text)` pairs in send order
    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    /// Message texts in send order
    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, text)| text.clone()).collect()
    }

    /// Texts starting with `prefix`
    pub fn count_prefixed(&self, prefix: &str) -> usize {
        self.sent.lock().iter().filter(|(_, text)| text.starts_with(prefix)).count()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), ChannelError> {
        self.sent.lock().push((channel_id.to_string(), text.to_string()));
        if self.fail {
            return Err(ChannelError::Send {
                channel_id: channel_id.to_string(),
                reason: "channel offline".into(),
            });
        }
        Ok(())
    }
}

/// In-memory ledger that fails appends according to a script
///
/// Each append pops one entry; `Some(err)` fails the attempt, `None` or an
/// empty script appends to the inner [`MemoryLedger`].
#[derive(Debug, Default)]
pub struct ScriptedLedger {
    inner: MemoryLedger,
    script: Mutex<VecDeque<Option<AppendError>>>,
    append_delay: Option<Duration>,
    ack_delay: Option<Duration>,
    attempts: AtomicUsize,
    reads_fail: bool,
}

impl ScriptedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next appends with `errors`, in order
    pub fn failing_with(errors: impl IntoIterator<Item = AppendError>) -> Self {
        Self {
            script: Mutex::new(errors.into_iter().map(Some).collect()),
            ..Self::default()
        }
    }

    /// Every append fails with `err`
    pub fn always_failing(err: AppendError, times: usize) -> Self {
        Self::failing_with(std::iter::repeat(err).take(times))
    }

    /// Sleep before each append (tokio time, so it honours paused clocks)
    pub fn with_append_delay(mut self, delay: Duration) -> Self {
        self.append_delay = Some(delay);
        self
    }

    /// Sleep after each successful append, before acknowledging it, so a
    /// request timeout fires with the row already written
    pub fn with_ack_delay(mut self, delay: Duration) -> Self {
        self.ack_delay = Some(delay);
        self
    }

    /// Reads fail with a transient error
    pub fn with_failing_reads(mut self) -> Self {
        self.reads_fail = true;
        self
    }

    /// Append attempts seen, including failed ones
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Rows actually written to `table`
    pub fn rows(&self, table: &str) -> Vec<LedgerRow> {
        self.inner.rows(table)
    }

    /// Write a row directly, bypassing the script
    pub async fn seed(&self, table: &str, row: &LedgerRow) -> String {
        self.inner.append_row(table, row).await.unwrap()
    }
}

#[async_trait]
impl LedgerStore for ScriptedLedger {
    async fn append_row(&self, table: &str, row: &LedgerRow) -> Result<String, AppendError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.append_delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().pop_front().flatten();
        if let Some(err) = scripted {
            return Err(err);
        }
        let location = self.inner.append_row(table, row).await?;
        if let Some(delay) = self.ack_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(location)
    }

    async fn read_rows(&self, table: &str, limit: usize) -> Result<Vec<StoredRow>, AppendError> {
        if self.reads_fail {
            return Err(AppendError::transient("ledger read unavailable"));
        }
        self.inner.read_rows(table, limit).await
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Everything a pipeline test needs to make assertions
pub struct Harness {
    pub pipeline: Orchestrator,
    pub ledger: Arc<ScriptedLedger>,
    pub channel: Arc<RecordingChannel>,
    pub store: Arc<DedupeStore>,
}

impl Harness {
    /// Pipeline over an in-memory store
    pub fn new(ledger: ScriptedLedger) -> Self {
        Self::with_store(ledger, DedupeStore::in_memory(), test_config())
    }

    /// Pipeline over `store` with `config`
    pub fn with_store(ledger: ScriptedLedger, store: DedupeStore, config: IngestConfig) -> Self {
        let ledger = Arc::new(ledger);
        let store = Arc::new(store);
        let channel = Arc::new(RecordingChannel::new());
        let port = LedgerPort::new(ledger.clone(), TABLE)
            .with_retry(config.retry.clone())
            .with_verify_scan(config.dedupe.reconcile_scan);
        let pipeline = Orchestrator::new(config, store.clone(), port, channel.clone()).unwrap();
        Self {
            pipeline,
            ledger,
            channel,
            store,
        }
    }

    /// Rows written to the ledger table
    pub fn rows(&self) -> Vec<LedgerRow> {
        self.ledger.rows(TABLE)
    }
}
