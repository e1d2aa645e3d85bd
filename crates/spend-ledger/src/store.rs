//! The ledger store seam
//!
//! A [`LedgerStore`] is the raw, single-attempt operation against one
//! backend. Retry, timeouts and receipts live in [`crate::LedgerPort`].

use crate::error::AppendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spend_record::{LedgerRow, Receipt};

/// A row read back from the ledger, with where it lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    /// Backend-specific location (row index, line number)
    pub location: String,
    /// The row
    pub row: LedgerRow,
}

impl StoredRow {
    /// Receipt for this row, as it was issued when the row was appended
    #[must_use]
    pub fn receipt(&self) -> Receipt {
        Receipt::at(&self.row.receipt, &self.location)
    }
}

/// One ledger backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append one row to `table`, returning its location
    async fn append_row(&self, table: &str, row: &LedgerRow) -> Result<String, AppendError>;

    /// Up to `limit` rows of `table`, oldest first
    async fn read_rows(&self, table: &str, limit: usize) -> Result<Vec<StoredRow>, AppendError>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}
