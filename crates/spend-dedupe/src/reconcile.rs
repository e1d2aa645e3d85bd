//! Reconciling the idempotency store with the ledger
//!
//! Ledger rows carry their event key in the receipt column, so the ledger is
//! the ground truth whenever the local store is unsure (a stale reservation)
//! or gone (lost disk).

use crate::error::DedupeError;
use crate::store::{DedupeStatus, DedupeStore};
use chrono::{DateTime, Utc};
use spend_ledger::{AppendError, LedgerPort, StoredRow};
use spend_record::{normalize_text, Decimal, EventKey, LedgerRow, Receipt};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Content a ledger row must match to count as the same purchase
///
/// Used for events without a channel message id, where a resend that lands
/// in another fingerprint bucket gets a different key.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentQuery {
    /// Chat the purchase was reported in
    pub chat_id: String,
    /// Reporting author
    pub author_id: String,
    /// Item text, compared after normalization
    pub item: String,
    /// Inclusive amount range
    pub amount_min: Decimal,
    /// Inclusive amount range
    pub amount_max: Decimal,
    /// Earliest message time
    pub since: DateTime<Utc>,
    /// Latest message time
    pub until: DateTime<Utc>,
}

impl ContentQuery {
    /// Query for `amount` ± `tolerance` within `window` either side of `at`
    #[must_use]
    pub fn around(
        chat_id: impl Into<String>,
        author_id: impl Into<String>,
        item: impl Into<String>,
        amount: Decimal,
        tolerance: Decimal,
        at: DateTime<Utc>,
        window: Duration,
    ) -> Self {
        let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        let tolerance = tolerance.abs();
        Self {
            chat_id: chat_id.into(),
            author_id: author_id.into(),
            item: item.into(),
            amount_min: amount - tolerance,
            amount_max: amount + tolerance,
            since: at - window,
            until: at + window,
        }
    }

    /// Whether `row` describes this purchase
    #[must_use]
    pub fn matches(&self, row: &LedgerRow) -> bool {
        row.chat_id == self.chat_id
            && (self.author_id.is_empty() || row.author_id == self.author_id)
            && normalize_text(&row.item) == normalize_text(&self.item)
            && (self.amount_min..=self.amount_max).contains(&row.price)
            && (self.since..=self.until).contains(&row.ts)
    }
}

/// Receipt of the ledger row for `key`, among the last `scan` rows
///
/// Rows are matched by the event key embedded in their receipt first. With
/// a `content` query, rows that carry no key of a channel message (foreign
/// rows, or rows keyed by another fingerprint) are then matched by content.
///
/// # Errors
/// Ledger read failures.
pub async fn lookup_by_content(
    port: &LedgerPort,
    key: &EventKey,
    content: Option<&ContentQuery>,
    scan: usize,
) -> Result<Option<Receipt>, AppendError> {
    let rows = port.rows(scan).await?;
    if let Some(stored) = rows.iter().rev().find(|s| s.row.event_key().as_ref() == Some(key)) {
        return Ok(Some(stored.receipt()));
    }
    let Some(content) = content else {
        return Ok(None);
    };
    let found = rows.iter().rev().find(|stored| {
        let comparable = match stored.row.event_key() {
            None => true,
            Some(other) => other.is_fingerprint() && key.is_fingerprint(),
        };
        comparable && content.matches(&stored.row)
    });
    if let Some(stored) = found {
        debug!(%key, location = %stored.location, "matched ledger row by content");
    }
    Ok(found.map(StoredRow::receipt))
}

/// What a reconciliation pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Ledger rows inspected
    pub scanned: usize,
    /// Rows without an event key in their receipt
    pub foreign: usize,
    /// Keys newly committed from the ledger
    pub restored: Vec<EventKey>,
    /// Keys already committed locally
    pub known: usize,
    /// Keys committed locally under a different receipt
    pub mismatched: Vec<EventKey>,
}

/// Commit every ledger row the store does not know about
///
/// # Errors
/// Ledger read failures, or a store that cannot persist.
pub async fn rebuild_from_ledger(
    store: &DedupeStore,
    port: &LedgerPort,
    scan: usize,
) -> Result<ReconcileReport, DedupeError> {
    let rows = port.rows(scan).await?;
    let mut report = ReconcileReport {
        scanned: rows.len(),
        ..ReconcileReport::default()
    };

    for stored in rows {
        let Some(key) = stored.row.event_key() else {
            report.foreign += 1;
            continue;
        };
        if store.status(&key) == Some(DedupeStatus::Committed) {
            report.known += 1;
        }
        match store.restore(&key, &stored.receipt(), Some(stored.row.summary())) {
            Ok(true) => report.restored.push(key),
            Ok(false) => {}
            Err(DedupeError::ReceiptMismatch { key, existing, attempted }) => {
                warn!(%key, %existing, %attempted, "ledger holds a second row for a committed key");
                report.mismatched.push(key);
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        scanned = report.scanned,
        restored = report.restored.len(),
        known = report.known,
        mismatched = report.mismatched.len(),
        "reconciled idempotency store with ledger"
    );
    Ok(report)
}
