use crate::error::{AppendError, LedgerError};
use crate::store::{LedgerStore, StoredRow};
use async_trait::async_trait;
use spend_record::LedgerRow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::warn;

/// Append-only JSON-lines ledger, one `<table>.jsonl` file per table
///
/// Locations are 1-based line numbers (`line12`). Appends are serialised
/// and synced before the location is returned.
#[derive(Debug)]
pub struct JsonlLedger {
    dir: PathBuf,
    /// Line count per table, loaded on first append
    lines: Mutex<HashMap<String, u64>>,
}

impl JsonlLedger {
    /// Ledger rooted at `dir`, created if missing
    ///
    /// # Errors
    /// [`LedgerError::Io`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| LedgerError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            lines: Mutex::new(HashMap::new()),
        })
    }

    /// File holding `table`
    ///
    /// # Errors
    /// [`AppendError::Permanent`] for table ids that are not plain names.
    pub fn table_path(&self, table: &str) -> Result<PathBuf, AppendError> {
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !table.starts_with('.');
        if !valid {
            return Err(AppendError::permanent(format!("invalid table id '{table}'")));
        }
        Ok(self.dir.join(format!("{table}.jsonl")))
    }

    async fn count_lines(path: &Path) -> Result<u64, AppendError> {
        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(AppendError::from_io("open ledger", &e)),
        };
        let mut lines = BufReader::new(file).lines();
        let mut count = 0;
        while lines
            .next_line()
            .await
            .map_err(|e| AppendError::from_io("read ledger", &e))?
            .is_some()
        {
            count += 1;
        }
        Ok(count)
    }
}

#[async_trait]
impl LedgerStore for JsonlLedger {
    async fn append_row(&self, table: &str, row: &LedgerRow) -> Result<String, AppendError> {
        let path = self.table_path(table)?;
        let mut line = serde_json::to_string(row)
            .map_err(|e| AppendError::permanent(format!("encode row: {e}")))?;
        line.push('\n');

        let mut lines = self.lines.lock().await;
        let count = match lines.get(table) {
            Some(count) => *count,
            None => Self::count_lines(&path).await?,
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| AppendError::from_io("open ledger", &e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| AppendError::from_io("write ledger", &e))?;
        file.sync_data()
            .await
            .map_err(|e| AppendError::from_io("sync ledger", &e))?;

        let count = count + 1;
        lines.insert(table.to_string(), count);
        Ok(format!("line{count}"))
    }

    async fn read_rows(&self, table: &str, limit: usize) -> Result<Vec<StoredRow>, AppendError> {
        let path = self.table_path(table)?;
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppendError::from_io("read ledger", &e)),
        };

        let mut rows = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerRow>(line) {
                Ok(row) => rows.push(StoredRow {
                    location: format!("line{}", idx + 1),
                    row,
                }),
                Err(e) => warn!(path = %path.display(), line = idx + 1, error = %e, "skipping malformed ledger line"),
            }
        }
        let skip = rows.len().saturating_sub(limit);
        Ok(rows.split_off(skip))
    }

    fn name(&self) -> &'static str {
        "jsonl"
    }
}
