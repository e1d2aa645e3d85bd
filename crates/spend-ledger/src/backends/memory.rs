use crate::error::AppendError;
use crate::store::{LedgerStore, StoredRow};
use async_trait::async_trait;
use parking_lot::Mutex;
use spend_record::LedgerRow;
use std::collections::HashMap;

/// In-memory ledger; locations are 1-based row numbers (`row3`)
#[derive(Debug, Default)]
pub struct MemoryLedger {
    tables: Mutex<HashMap<String, Vec<LedgerRow>>>,
}

impl MemoryLedger {
    /// Empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row in `table`
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<LedgerRow> {
        self.tables.lock().get(table).cloned().unwrap_or_default()
    }

    /// Number of rows in `table`
    #[must_use]
    pub fn len(&self, table: &str) -> usize {
        self.tables.lock().get(table).map_or(0, Vec::len)
    }

    /// Whether `table` has no rows
    #[must_use]
    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn append_row(&self, table: &str, row: &LedgerRow) -> Result<String, AppendError> {
        let mut tables = self.tables.lock();
        let rows = tables.entry(table.to_string()).or_default();
        rows.push(row.clone());
        Ok(format!("row{}", rows.len()))
    }

    async fn read_rows(&self, table: &str, limit: usize) -> Result<Vec<StoredRow>, AppendError> {
        let tables = self.tables.lock();
        let rows = tables.get(table).map(Vec::as_slice).unwrap_or_default();
        let skip = rows.len().saturating_sub(limit);
        Ok(rows
            .iter()
            .enumerate()
            .skip(skip)
            .map(|(idx, row)| StoredRow {
                location: format!("row{}", idx + 1),
                row: row.clone(),
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
