//! Durable idempotency store
//!
//! One record per [`EventKey`]; the key moves through
//! `absent -> Reserved -> Committed | Failed`, and `Failed` may be reserved
//! again. `Committed` is terminal.
//!
//! The table is a JSON snapshot written to a temporary sibling file and
//! renamed over the old one, so a crash leaves either the old or the new
//! snapshot, never a torn one. Every mutation is durable before it returns.

use crate::error::DedupeError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use spend_record::{EventKey, Receipt, Summary};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const FORMAT_VERSION: u32 = 1;

/// Lifecycle status of an event key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupeStatus {
    /// Claimed by an in-flight append
    Reserved,
    /// Appended; the receipt is recorded
    Committed,
    /// Append failed; may be reserved again
    Failed,
}

/// One idempotency record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupeRecord {
    /// Event key
    pub key: EventKey,
    /// Current status
    pub status: DedupeStatus,
    /// Receipt, once committed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Receipt>,
    /// What was (or is being) logged, for "already logged" replies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
    /// Number of reservations made for this key
    pub attempts: u32,
    /// Reason of the last failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// First reservation
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

/// Result of [`DedupeStore::reserve`]
#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    /// The caller now owns the key and must commit or fail it
    Reserved,
    /// Already appended; nothing to do
    AlreadyCommitted {
        /// Receipt of the original append
        receipt: Receipt,
        /// Summary recorded with it
        summary: Option<Summary>,
    },
    /// Another worker holds the reservation
    AlreadyReserved,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    records: BTreeMap<EventKey, DedupeRecord>,
}

/// Idempotency store, in memory or backed by a snapshot file
#[derive(Debug)]
pub struct DedupeStore {
    path: Option<PathBuf>,
    records: Mutex<BTreeMap<EventKey, DedupeRecord>>,
    /// Keys found `Reserved` when the file was opened
    stale: Vec<EventKey>,
}

impl DedupeStore {
    /// Volatile store; nothing survives the process
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Mutex::new(BTreeMap::new()),
            stale: Vec::new(),
        }
    }

    /// Open (or create) the store at `path`
    ///
    /// # Errors
    /// [`DedupeError::Corrupted`] if the file exists but does not parse; the
    /// store refuses to start empty over unreadable state.
    /// [`DedupeError::Io`] on read failures.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DedupeError> {
        let path = path.into();
        let records = load(&path)?;
        let stale: Vec<EventKey> = records
            .values()
            .filter(|r| r.status == DedupeStatus::Reserved)
            .map(|r| r.key.clone())
            .collect();
        if !stale.is_empty() {
            warn!(path = %path.display(), count = stale.len(), "stale reservations from a previous run");
        }
        info!(path = %path.display(), records = records.len(), "idempotency store opened");
        Ok(Self {
            path: Some(path),
            records: Mutex::new(records),
            stale,
        })
    }

    /// Backing file, if any
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Claim `key` for an append
    ///
    /// Absent and `Failed` keys become `Reserved`. Concurrent callers for the
    /// same key are serialised: exactly one gets [`ReserveOutcome::Reserved`].
    ///
    /// # Errors
    /// [`DedupeError::Io`] if the reservation cannot be made durable; the
    /// in-memory state is left unchanged.
    pub fn reserve(&self, key: &EventKey, summary: Option<Summary>) -> Result<ReserveOutcome, DedupeError> {
        self.mutate(|records| {
            let now = Utc::now();
            match records.get_mut(key) {
                Some(record) => match record.status {
                    DedupeStatus::Committed => Ok((
                        false,
                        ReserveOutcome::AlreadyCommitted {
                            receipt: record.receipt.clone().unwrap_or_else(|| Receipt::token_for(key)),
                            summary: record.summary.clone(),
                        },
                    )),
                    DedupeStatus::Reserved => Ok((false, ReserveOutcome::AlreadyReserved)),
                    DedupeStatus::Failed => {
                        record.status = DedupeStatus::Reserved;
                        record.attempts += 1;
                        record.updated_at = now;
                        if summary.is_some() {
                            record.summary = summary;
                        }
                        Ok((true, ReserveOutcome::Reserved))
                    }
                },
                None => {
                    records.insert(
                        key.clone(),
                        DedupeRecord {
                            key: key.clone(),
                            status: DedupeStatus::Reserved,
                            receipt: None,
                            summary,
                            attempts: 1,
                            last_error: None,
                            created_at: now,
                            updated_at: now,
                        },
                    );
                    Ok((true, ReserveOutcome::Reserved))
                }
            }
        })
    }

    /// Record a successful append
    ///
    /// Committing again with the same receipt is a no-op.
    ///
    /// # Errors
    /// [`DedupeError::NotReserved`] unless the key is reserved (a failed key
    /// must be reserved again first), [`DedupeError::ReceiptMismatch`] for a
    /// second, different receipt.
    pub fn commit(&self, key: &EventKey, receipt: &Receipt) -> Result<(), DedupeError> {
        self.commit_with_summary(key, receipt, None)
    }

    /// [`Self::commit`], also recording a summary when none is stored yet
    ///
    /// # Errors
    /// As for [`Self::commit`].
    pub fn commit_with_summary(
        &self,
        key: &EventKey,
        receipt: &Receipt,
        summary: Option<Summary>,
    ) -> Result<(), DedupeError> {
        self.mutate(|records| {
            let record = records
                .get_mut(key)
                .ok_or_else(|| DedupeError::NotReserved(key.clone()))?;
            if record.status == DedupeStatus::Committed {
                return match &record.receipt {
                    Some(existing) if existing != receipt => Err(DedupeError::ReceiptMismatch {
                        key: key.clone(),
                        existing: existing.clone(),
                        attempted: receipt.clone(),
                    }),
                    _ => Ok((false, ())),
                };
            }
            if record.status != DedupeStatus::Reserved {
                return Err(DedupeError::NotReserved(key.clone()));
            }
            record.status = DedupeStatus::Committed;
            record.receipt = Some(receipt.clone());
            record.last_error = None;
            record.updated_at = Utc::now();
            if record.summary.is_none() {
                record.summary = summary;
            }
            Ok((true, ()))
        })?;
        debug!(%key, %receipt, "committed");
        Ok(())
    }

    /// Record a failed append; the key may be reserved again later
    ///
    /// # Errors
    /// [`DedupeError::NotReserved`] for unknown keys,
    /// [`DedupeError::AlreadyCommitted`] for committed ones.
    pub fn fail(&self, key: &EventKey, reason: &str) -> Result<(), DedupeError> {
        self.mutate(|records| {
            let record = records
                .get_mut(key)
                .ok_or_else(|| DedupeError::NotReserved(key.clone()))?;
            if record.status == DedupeStatus::Committed {
                return Err(DedupeError::AlreadyCommitted(key.clone()));
            }
            record.status = DedupeStatus::Failed;
            record.last_error = Some(reason.to_string());
            record.updated_at = Utc::now();
            Ok((true, ()))
        })?;
        debug!(%key, reason, "marked failed");
        Ok(())
    }

    /// Insert a committed record for a row found in the ledger
    ///
    /// Returns `false` if the key was already committed.
    ///
    /// # Errors
    /// [`DedupeError::ReceiptMismatch`] if committed with another receipt.
    pub fn restore(&self, key: &EventKey, receipt: &Receipt, summary: Option<Summary>) -> Result<bool, DedupeError> {
        self.mutate(|records| {
            if let Some(existing) = records.get(key) {
                if existing.status == DedupeStatus::Committed {
                    return match &existing.receipt {
                        Some(r) if r != receipt => Err(DedupeError::ReceiptMismatch {
                            key: key.clone(),
                            existing: r.clone(),
                            attempted: receipt.clone(),
                        }),
                        _ => Ok((false, false)),
                    };
                }
            }
            let now = Utc::now();
            let (attempts, created_at) = records
                .get(key)
                .map_or((1, now), |r| (r.attempts, r.created_at));
            records.insert(
                key.clone(),
                DedupeRecord {
                    key: key.clone(),
                    status: DedupeStatus::Committed,
                    receipt: Some(receipt.clone()),
                    summary,
                    attempts,
                    last_error: None,
                    created_at,
                    updated_at: now,
                },
            );
            Ok((true, true))
        })
    }

    /// Current record for `key`
    #[must_use]
    pub fn get(&self, key: &EventKey) -> Option<DedupeRecord> {
        self.records.lock().get(key).cloned()
    }

    /// Status for `key`, if known
    #[must_use]
    pub fn status(&self, key: &EventKey) -> Option<DedupeStatus> {
        self.records.lock().get(key).map(|r| r.status)
    }

    /// All records, ordered by key
    #[must_use]
    pub fn records(&self) -> Vec<DedupeRecord> {
        self.records.lock().values().cloned().collect()
    }

    /// Keys that were `Reserved` when the store was opened
    ///
    /// A previous run died between reserve and commit/fail; whether the row
    /// reached the ledger is unknown until it is looked up.
    #[must_use]
    pub fn stale_reservations(&self) -> &[EventKey] {
        &self.stale
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `f` to a copy of the table, persist it, then publish it
    ///
    /// `f` returns whether it changed anything alongside its result; unchanged
    /// tables are not rewritten.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<EventKey, DedupeRecord>) -> Result<(bool, T), DedupeError>,
    ) -> Result<T, DedupeError> {
        let mut records = self.records.lock();
        let mut next = records.clone();
        let (changed, out) = f(&mut next)?;
        if changed {
            if let Some(path) = &self.path {
                persist(path, &next)?;
            }
            *records = next;
        }
        Ok(out)
    }
}

fn load(path: &Path) -> Result<BTreeMap<EventKey, DedupeRecord>, DedupeError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(source) => {
            return Err(DedupeError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(BTreeMap::new());
    }
    let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| DedupeError::Corrupted {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if snapshot.version != FORMAT_VERSION {
        return Err(DedupeError::Corrupted {
            path: path.to_path_buf(),
            reason: format!("unsupported format version {}", snapshot.version),
        });
    }
    Ok(snapshot.records)
}

fn persist(path: &Path, records: &BTreeMap<EventKey, DedupeRecord>) -> Result<(), DedupeError> {
    let io = |source: std::io::Error| DedupeError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(io)?;

    let snapshot = Snapshot {
        version: FORMAT_VERSION,
        records: records.clone(),
    };
    let bytes = serde_json::to_vec_pretty(&snapshot)
        .map_err(|e| io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io)?;
    tmp.write_all(&bytes).map_err(io)?;
    tmp.as_file().sync_all().map_err(io)?;
    tmp.persist(path).map_err(|e| io(e.error))?;
    Ok(())
}
