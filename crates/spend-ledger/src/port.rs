//! Ledger append port
//!
//! Wraps a [`LedgerStore`] with the table id, the retry policy and receipt
//! construction. The port never deduplicates separate calls; that is the
//! caller's job. Within one [`LedgerPort::append`] a failed attempt is
//! ambiguous (a timed-out write may still have landed), so every retry and
//! the final give-up first look for the row's event key in the table.

use crate::error::AppendError;
use crate::retry::{with_retry, RetryPolicy};
use crate::store::{LedgerStore, StoredRow};
use spend_record::{Decimal, EventKey, LedgerRow, Receipt};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Rows searched when checking whether an ambiguous append landed
pub const DEFAULT_VERIFY_SCAN: usize = 500;

/// Retrying append port over one ledger table
#[derive(Clone)]
pub struct LedgerPort {
    store: Arc<dyn LedgerStore>,
    table: String,
    retry: RetryPolicy,
    verify_scan: usize,
}

impl std::fmt::Debug for LedgerPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerPort")
            .field("backend", &self.store.name())
            .field("table", &self.table)
            .field("retry", &self.retry)
            .finish()
    }
}

impl LedgerPort {
    /// Port over `table` with the default retry policy
    pub fn new(store: Arc<dyn LedgerStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
            retry: RetryPolicy::default(),
            verify_scan: DEFAULT_VERIFY_SCAN,
        }
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// With the number of trailing rows searched for an ambiguous append
    #[inline]
    #[must_use]
    pub fn with_verify_scan(mut self, rows: usize) -> Self {
        self.verify_scan = rows.max(1);
        self
    }

    /// Table id
    #[inline]
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Retry policy in use
    #[inline]
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Append `row`, retrying transient failures
    ///
    /// The receipt is the row's receipt token plus the backend location.
    /// Before each retry, and once more before giving up on a transient
    /// failure, the table is searched for a row carrying the same event key;
    /// a hit means an earlier attempt landed and its location is used.
    ///
    /// # Errors
    /// [`AppendError::Permanent`] as soon as one is seen, otherwise the last
    /// [`AppendError::Transient`] once attempts are exhausted and the row is
    /// not in the table.
    #[instrument(skip(self, row), fields(table = %self.table, receipt = %row.receipt))]
    pub async fn append(&self, row: &LedgerRow) -> Result<Receipt, AppendError> {
        let key = row.event_key();
        let result = with_retry(&self.retry, "ledger append", |attempt| {
            let key = key.as_ref();
            async move {
                if attempt > 1 {
                    if let Some(location) = self.landed(key).await? {
                        info!(attempt, %location, "earlier attempt landed");
                        return Ok(location);
                    }
                }
                self.store.append_row(&self.table, row).await
            }
        })
        .await;

        let location = match result {
            Ok(location) => location,
            Err(err) if err.is_retryable() => match self.landed(key.as_ref()).await {
                Ok(Some(location)) => {
                    info!(%location, error = %err, "append landed despite the failure");
                    location
                }
                Ok(None) => return Err(err),
                Err(check) => {
                    warn!(error = %check, "could not check whether the append landed");
                    return Err(err);
                }
            },
            Err(err) => return Err(err),
        };
        let receipt = Receipt::at(&row.receipt, &location);
        info!(%receipt, backend = self.store.name(), "row appended");
        Ok(receipt)
    }

    /// Location of the row carrying `key`, if one is in the trailing window
    async fn landed(&self, key: Option<&EventKey>) -> Result<Option<String>, AppendError> {
        let Some(key) = key else {
            return Ok(None);
        };
        let rows = tokio::time::timeout(
            self.retry.request_timeout(),
            self.store.read_rows(&self.table, self.verify_scan),
        )
        .await
        .map_err(|_| {
            AppendError::transient(format!(
                "ledger read timed out after {}ms",
                self.retry.request_timeout_ms
            ))
        })??;
        Ok(rows
            .into_iter()
            .rev()
            .find(|stored| stored.row.event_key().as_ref() == Some(key))
            .map(|stored| stored.location))
    }

    /// Up to `limit` rows, oldest first
    ///
    /// # Errors
    /// As for [`Self::append`].
    pub async fn rows(&self, limit: usize) -> Result<Vec<StoredRow>, AppendError> {
        with_retry(&self.retry, "ledger read", |_| {
            self.store.read_rows(&self.table, limit)
        })
        .await
    }

    /// Find the row whose receipt embeds `key` among the last `scan` rows
    ///
    /// # Errors
    /// As for [`Self::append`].
    pub async fn find_by_key(&self, key: &EventKey, scan: usize) -> Result<Option<StoredRow>, AppendError> {
        let rows = self.rows(scan).await?;
        Ok(rows
            .into_iter()
            .rev()
            .find(|stored| stored.row.event_key().as_ref() == Some(key)))
    }

    /// Rows whose item or raw text contains `query` and, if given, whose
    /// price equals `price`
    ///
    /// # Errors
    /// As for [`Self::append`].
    pub async fn search(
        &self,
        query: &str,
        price: Option<Decimal>,
        scan: usize,
    ) -> Result<Vec<StoredRow>, AppendError> {
        let needle = query.trim().to_lowercase();
        let rows = self.rows(scan).await?;
        Ok(rows
            .into_iter()
            .filter(|stored| {
                needle.is_empty()
                    || stored.row.item.to_lowercase().contains(&needle)
                    || stored.row.raw_text.to_lowercase().contains(&needle)
            })
            .filter(|stored| price.map_or(true, |p| stored.row.price == p))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockLedgerStore;
    use chrono::{TimeZone, Utc};
    use mockall::Sequence;
    use spend_record::Category;
    use std::str::FromStr;

    fn row() -> LedgerRow {
        LedgerRow {
            ts: Utc.with_ymd_and_hms(2026, 1, 30, 6, 59, 0).unwrap(),
            chat_id: "c".into(),
            message_id: Some("7".into()),
            author_id: "a".into(),
            author_name: "A".into(),
            item: "gloves".into(),
            price: Decimal::from_str("132.78").unwrap(),
            currency: "AUD".into(),
            category: Category::Consumables,
            project_code: "Pursuit".into(),
            quantity: None,
            vendor: None,
            notes: None,
            raw_text: "buy gloves 132.78 AUD Pursuit consumables".into(),
            receipt: "spend:msg:c:7".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let mut store = MockLedgerStore::new();
        let mut seq = Sequence::new();
        store
            .expect_append_row()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(AppendError::transient("HTTP 503")));
        store
            .expect_append_row()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|table, _| Ok(format!("{table}-row9")));
        store
            .expect_read_rows()
            .times(2)
            .returning(|_, _| Ok(Vec::new()));
        store.expect_name().return_const("mock");

        let port = LedgerPort::new(Arc::new(store), "Spend");
        let receipt = port.append(&row()).await.unwrap();
        assert_eq!(receipt.as_str(), "spend:msg:c:7@Spend-row9");
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let mut store = MockLedgerStore::new();
        store
            .expect_append_row()
            .times(1)
            .returning(|_, _| Err(AppendError::permanent("HTTP 400: bad column count")));
        store.expect_name().return_const("mock");

        let port = LedgerPort::new(Arc::new(store), "Spend");
        let err = port.append(&row()).await.unwrap_err();
        assert_eq!(err, AppendError::permanent("HTTP 400: bad column count"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_return_last_transient() {
        let mut store = MockLedgerStore::new();
        store
            .expect_append_row()
            .times(2)
            .returning(|_, _| Err(AppendError::transient("HTTP 429")));
        store
            .expect_read_rows()
            .times(2)
            .returning(|_, _| Ok(Vec::new()));
        store.expect_name().return_const("mock");

        let port = LedgerPort::new(Arc::new(store), "Spend")
            .with_retry(RetryPolicy::default().with_max_attempts(2));
        let err = port.append(&row()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_uses_the_row_an_earlier_attempt_wrote() {
        let mut store = MockLedgerStore::new();
        store
            .expect_append_row()
            .times(1)
            .returning(|_, _| Err(AppendError::transient("ledger append timed out after 500ms")));
        store.expect_read_rows().times(1).returning(|_, _| {
            Ok(vec![StoredRow {
                location: "row4".into(),
                row: row(),
            }])
        });
        store.expect_name().return_const("mock");

        let port = LedgerPort::new(Arc::new(store), "Spend");
        let receipt = port.append(&row()).await.unwrap();
        assert_eq!(receipt.as_str(), "spend:msg:c:7@row4");
    }

    #[tokio::test(start_paused = true)]
    async fn final_check_finds_a_row_written_by_the_last_attempt() {
        let mut store = MockLedgerStore::new();
        let mut seq = Sequence::new();
        store
            .expect_append_row()
            .times(1)
            .returning(|_, _| Err(AppendError::transient("HTTP 504")));
        store
            .expect_read_rows()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(AppendError::transient("HTTP 503")));
        store.expect_read_rows().times(1).in_sequence(&mut seq).returning(|_, _| {
            Ok(vec![StoredRow {
                location: "row2".into(),
                row: row(),
            }])
        });
        store.expect_name().return_const("mock");

        let port = LedgerPort::new(Arc::new(store), "Spend")
            .with_retry(RetryPolicy::default().with_max_attempts(2));
        let receipt = port.append(&row()).await.unwrap();
        assert_eq!(receipt.as_str(), "spend:msg:c:7@row2");
    }
}
