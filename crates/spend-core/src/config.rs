//! Pipeline configuration
//!
//! Loaded from TOML; every section and field is optional and defaults to
//! the values below.
//!
//! ```toml
//! [extraction]
//! min_confidence = 0.4
//!
//! [dedupe]
//! state_path = "state/dedupe.json"
//!
//! [ledger]
//! backend = "http"
//! table = "SpendLog"
//! base_url = "https://graph.example.com/v1.0/me/drive/items/abc/workbook"
//!
//! [retry]
//! max_attempts = 3
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use spend_ledger::{HttpTableLedger, JsonlLedger, LedgerPort, LedgerStore, MemoryLedger, RetryPolicy};
use spend_record::Vocabulary;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Closed vocabularies for the extractor
    pub vocabulary: Vocabulary,
    /// Extraction thresholds
    pub extraction: ExtractionConfig,
    /// Idempotency store
    pub dedupe: DedupeConfig,
    /// Clarification tracker
    pub clarification: ClarificationConfig,
    /// Ledger backend
    pub ledger: LedgerConfig,
    /// Ledger retry policy
    pub retry: RetryPolicy,
    /// Log output
    pub logging: LoggingConfig,
}

/// Extraction thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Required fields below this confidence count as missing
    pub min_confidence: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self { min_confidence: 0.4 }
    }
}

/// Idempotency store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupeConfig {
    /// Snapshot file; `None` keeps state in memory only
    pub state_path: Option<PathBuf>,
    /// Fingerprint time bucket for events without a message id
    pub fingerprint_window_secs: u64,
    /// How long to wait on an in-flight duplicate before giving up
    pub in_flight_wait_ms: u64,
    /// Poll interval while waiting on an in-flight duplicate
    pub in_flight_poll_ms: u64,
    /// Ledger rows scanned by reconciliation lookups
    pub reconcile_scan: usize,
    /// Match fingerprint-keyed events against ledger rows by content
    pub content_lookup: bool,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            state_path: None,
            fingerprint_window_secs: 120,
            in_flight_wait_ms: 5_000,
            in_flight_poll_ms: 250,
            reconcile_scan: 500,
            content_lookup: true,
        }
    }
}

impl DedupeConfig {
    /// Fingerprint bucket width
    #[inline]
    #[must_use]
    pub fn fingerprint_window(&self) -> Duration {
        Duration::from_secs(self.fingerprint_window_secs)
    }

    /// Bounded wait for an in-flight duplicate
    #[inline]
    #[must_use]
    pub fn in_flight_wait(&self) -> Duration {
        Duration::from_millis(self.in_flight_wait_ms)
    }

    /// Poll interval for an in-flight duplicate
    #[inline]
    #[must_use]
    pub fn in_flight_poll(&self) -> Duration {
        Duration::from_millis(self.in_flight_poll_ms.max(1))
    }
}

/// Clarification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClarificationConfig {
    /// Pending clarifications older than this are dropped
    pub ttl_secs: u64,
}

impl Default for ClarificationConfig {
    fn default() -> Self {
        Self { ttl_secs: 15 * 60 }
    }
}

impl ClarificationConfig {
    /// Pending entry lifetime
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Which ledger backend to write to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    /// Process memory; for dry runs
    #[default]
    Memory,
    /// Append-only JSONL files under `path`
    Jsonl,
    /// Remote table service at `base_url`
    Http,
}

/// Ledger settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Backend kind
    pub backend: LedgerBackend,
    /// Table id rows are appended to
    pub table: String,
    /// Directory for the jsonl backend
    pub path: Option<PathBuf>,
    /// Base URL for the http backend
    pub base_url: Option<String>,
    /// Environment variable holding the bearer token
    pub token_env: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Memory,
            table: "SpendLog".to_string(),
            path: None,
            base_url: None,
            token_env: "SPENDLOG_LEDGER_TOKEN".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Build the configured backend
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] when the backend's location is missing,
    /// [`ConfigError::Ledger`] when it cannot be opened.
    pub fn build_store(&self, retry: &RetryPolicy) -> Result<Arc<dyn LedgerStore>, ConfigError> {
        let store: Arc<dyn LedgerStore> = match self.backend {
            LedgerBackend::Memory => Arc::new(MemoryLedger::new()),
            LedgerBackend::Jsonl => {
                let path = self
                    .path
                    .as_ref()
                    .ok_or_else(|| ConfigError::Invalid("ledger.path is required for jsonl".into()))?;
                Arc::new(JsonlLedger::open(path)?)
            }
            LedgerBackend::Http => {
                let url = self
                    .base_url
                    .as_deref()
                    .ok_or_else(|| ConfigError::Invalid("ledger.base_url is required for http".into()))?;
                Arc::new(HttpTableLedger::new(url, retry.request_timeout())?.with_token_from_env(&self.token_env)?)
            }
        };
        Ok(store)
    }

    /// Build the backend and bind it to the table with `retry`
    ///
    /// # Errors
    /// As for [`Self::build_store`].
    pub fn build_port(&self, retry: &RetryPolicy) -> Result<LedgerPort, ConfigError> {
        let store = self.build_store(retry)?;
        Ok(LedgerPort::new(store, self.table.clone()).with_retry(retry.clone()))
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable logs
    pub json: bool,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: "info".to_string(),
        }
    }
}

impl IngestConfig {
    /// Default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML and validate
    ///
    /// # Errors
    /// [`ConfigError::Parse`] for bad TOML, [`ConfigError::Invalid`] for
    /// values [`Self::validate`] rejects.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as for
    /// [`Self::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// With vocabulary
    #[inline]
    #[must_use]
    pub fn with_vocabulary(mut self, vocabulary: Vocabulary) -> Self {
        self.vocabulary = vocabulary;
        self
    }

    /// With minimum field confidence
    #[inline]
    #[must_use]
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.extraction.min_confidence = min_confidence;
        self
    }

    /// With dedupe state file
    #[inline]
    #[must_use]
    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dedupe.state_path = Some(path.into());
        self
    }

    /// With in-flight duplicate wait and poll interval
    #[inline]
    #[must_use]
    pub fn with_in_flight_wait(mut self, wait: Duration, poll: Duration) -> Self {
        self.dedupe.in_flight_wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        self.dedupe.in_flight_poll_ms = u64::try_from(poll.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With clarification TTL
    #[inline]
    #[must_use]
    pub fn with_clarification_ttl(mut self, ttl: Duration) -> Self {
        self.clarification.ttl_secs = ttl.as_secs();
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// With ledger settings
    #[inline]
    #[must_use]
    pub fn with_ledger(mut self, ledger: LedgerConfig) -> Self {
        self.ledger = ledger;
        self
    }

    /// Check ranges and cross-field consistency
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        self.vocabulary
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if !(0.0..=1.0).contains(&self.extraction.min_confidence) {
            return invalid("extraction.min_confidence must be within [0, 1]");
        }
        if self.dedupe.fingerprint_window_secs == 0 {
            return invalid("dedupe.fingerprint_window_secs must be positive");
        }
        if self.dedupe.in_flight_poll_ms > self.dedupe.in_flight_wait_ms {
            return invalid("dedupe.in_flight_poll_ms must not exceed in_flight_wait_ms");
        }
        if self.clarification.ttl_secs == 0 {
            return invalid("clarification.ttl_secs must be positive");
        }
        if self.ledger.table.trim().is_empty() {
            return invalid("ledger.table must not be empty");
        }
        self.retry
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("retry: {e}")))?;
        Ok(())
    }
}
