//! Remote table ledger over HTTP
//!
//! Speaks the workbook-table dialect: rows are appended with
//! `POST {base}/tables/{table}/rows/add` and a body of
//! `{"values": [[...]]}` in [`LedgerRow::COLUMNS`] order. Reads want the
//! newest rows, so they first ask `GET {base}/tables/{table}/rows/$count`
//! and then page the tail with `GET {base}/tables/{table}/rows?$skip=K&$top=N`.

use crate::error::{AppendError, LedgerError};
use crate::store::{LedgerStore, StoredRow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use spend_record::LedgerRow;
use std::time::Duration;
use tracing::{debug, warn};

/// Ledger backed by a remote table API
#[derive(Debug, Clone)]
pub struct HttpTableLedger {
    http: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddedRow {
    #[serde(default)]
    index: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RowPage {
    #[serde(default)]
    value: Vec<RemoteRow>,
}

#[derive(Debug, Deserialize)]
struct RemoteRow {
    #[serde(default)]
    index: Option<i64>,
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

impl HttpTableLedger {
    /// Client for `base_url` (the workbook root, without `/tables`)
    ///
    /// `timeout` bounds each HTTP request at the transport level.
    ///
    /// # Errors
    /// [`LedgerError::Config`] for an empty URL, [`LedgerError::Http`] if the
    /// client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LedgerError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(LedgerError::Config("ledger base URL is empty".into()));
        }
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            token: None,
        })
    }

    /// With bearer token
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Read the bearer token from environment variable `var`
    ///
    /// # Errors
    /// [`LedgerError::Config`] if the variable is unset or empty.
    pub fn with_token_from_env(self, var: &str) -> Result<Self, LedgerError> {
        match std::env::var(var) {
            Ok(token) if !token.trim().is_empty() => Ok(self.with_bearer_token(token.trim())),
            _ => Err(LedgerError::Config(format!("{var} is not set"))),
        }
    }

    fn rows_url(&self, table: &str) -> String {
        format!("{}/tables/{}/rows", self.base_url, encode_segment(table))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn row_count(&self, table: &str) -> Result<usize, AppendError> {
        let url = format!("{}/$count", self.rows_url(table));
        let body = self
            .send(self.http.get(&url), "count rows")
            .await?
            .text()
            .await
            .map_err(|e| AppendError::transient(format!("count rows: {e}")))?;
        parse_count(&body).ok_or_else(|| {
            AppendError::transient(format!(
                "count rows: bad response: {}",
                body.chars().take(80).collect::<String>()
            ))
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response, AppendError> {
        let response = self
            .authorize(request)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| classify_transport(what, &e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let reason = format!(
            "{what}: HTTP {status}: {}",
            body.chars().take(200).collect::<String>()
        );
        Err(classify_status(status, reason))
    }
}

#[async_trait]
impl LedgerStore for HttpTableLedger {
    async fn append_row(&self, table: &str, row: &LedgerRow) -> Result<String, AppendError> {
        let url = format!("{}/add", self.rows_url(table));
        let body = json!({ "values": [row.values()] });
        let response = self.send(self.http.post(&url).json(&body), "append row").await?;

        // The row is in; an unreadable body only costs us the index
        let location = match response.json::<AddedRow>().await {
            Ok(AddedRow { index: Some(index) }) => format!("row{index}"),
            Ok(AddedRow { index: None }) => "row".to_string(),
            Err(e) => {
                warn!(error = %e, "append response not understood");
                "row".to_string()
            }
        };
        debug!(%url, %location, "remote append accepted");
        Ok(location)
    }

    async fn read_rows(&self, table: &str, limit: usize) -> Result<Vec<StoredRow>, AppendError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let count = self.row_count(table).await?;
        let (skip, top) = tail_window(count, limit);
        if top == 0 {
            return Ok(Vec::new());
        }
        let request = self
            .http
            .get(self.rows_url(table))
            .query(&[("$skip", skip), ("$top", top)]);
        let page: RowPage = self
            .send(request, "list rows")
            .await?
            .json()
            .await
            .map_err(|e| AppendError::transient(format!("list rows: bad response: {e}")))?;
        debug!(table, count, skip, top, returned = page.value.len(), "read table tail");

        let mut rows = Vec::new();
        for remote in page.value {
            let Some(values) = remote.values.first() else {
                continue;
            };
            match LedgerRow::from_values(values) {
                Ok(row) => rows.push(StoredRow {
                    location: remote.index.map_or_else(|| "row".to_string(), |i| format!("row{i}")),
                    row,
                }),
                Err(e) => debug!(error = %e, "skipping row not written by this pipeline"),
            }
        }
        Ok(rows)
    }

    fn name(&self) -> &'static str {
        "http-table"
    }
}

/// Row count as plain text (`600`) or JSON (`600` or `{"value": 600}`)
fn parse_count(body: &str) -> Option<usize> {
    let body = body.trim();
    if let Ok(count) = body.parse() {
        return Some(count);
    }
    let value: Value = serde_json::from_str(body).ok()?;
    let count = value.get("value").unwrap_or(&value).as_u64()?;
    usize::try_from(count).ok()
}

/// `($skip, $top)` selecting the last `limit` of `count` rows
fn tail_window(count: usize, limit: usize) -> (usize, usize) {
    (count.saturating_sub(limit), limit.min(count))
}

/// Status codes worth retrying: auth refresh, timeouts, throttling, server
fn classify_status(status: StatusCode, reason: String) -> AppendError {
    match status {
        StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS => AppendError::Transient(reason),
        s if s.is_server_error() => AppendError::Transient(reason),
        _ => AppendError::Permanent(reason),
    }
}

fn classify_transport(what: &str, err: &reqwest::Error) -> AppendError {
    if err.is_builder() {
        AppendError::permanent(format!("{what}: {err}"))
    } else {
        AppendError::transient(format!("{what}: {err}"))
    }
}

fn encode_segment(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') {
                c.to_string()
            } else {
                let mut buf = [0u8; 4];
                c.encode_utf8(&mut buf)
                    .bytes()
                    .map(|b| format!("%{b:02X}"))
                    .collect()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let transient = [401, 403, 408, 429, 500, 502, 503, 504];
        for code in transient {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(classify_status(status, String::new()).is_retryable(), "{code}");
        }
        for code in [400, 404, 409, 413, 422] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(!classify_status(status, String::new()).is_retryable(), "{code}");
        }
    }

    #[test]
    fn tail_window_selects_the_newest_rows() {
        assert_eq!(tail_window(600, 500), (100, 500));
        assert_eq!(tail_window(500, 500), (0, 500));
        assert_eq!(tail_window(3, 500), (0, 3));
        assert_eq!(tail_window(0, 500), (0, 0));
    }

    #[test]
    fn count_bodies() {
        assert_eq!(parse_count("600"), Some(600));
        assert_eq!(parse_count(" 12\n"), Some(12));
        assert_eq!(parse_count(r#"{"@odata.context":"x","value":7}"#), Some(7));
        assert_eq!(parse_count("<html>"), None);
        assert_eq!(parse_count("-1"), None);
    }

    #[test]
    fn urls() {
        let ledger = HttpTableLedger::new("https://graph.example/workbook/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            ledger.rows_url("Spend Log"),
            "https://graph.example/workbook/tables/Spend%20Log/rows"
        );
    }

    #[test]
    fn empty_base_url_is_rejected() {
        assert!(matches!(
            HttpTableLedger::new("  ".trim(), Duration::from_secs(5)),
            Err(LedgerError::Config(_))
        ));
    }

    #[test]
    fn token_from_missing_env_var() {
        let ledger = HttpTableLedger::new("https://graph.example", Duration::from_secs(5)).unwrap();
        let err = ledger
            .with_token_from_env("SPENDLOG_TEST_TOKEN_THAT_IS_NEVER_SET")
            .unwrap_err();
        assert!(err.to_string().contains("SPENDLOG_TEST_TOKEN_THAT_IS_NEVER_SET"));
    }
}
