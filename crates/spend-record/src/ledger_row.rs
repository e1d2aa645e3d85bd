//! Ledger rows and receipts
//!
//! A [`LedgerRow`] is the external representation of one committed purchase.
//! Its `receipt` column embeds the [`EventKey`] so a lost local store can be
//! rebuilt from the ledger itself.

use crate::candidate::{CandidateRecord, Category, RequiredField, Summary};
use crate::error::RecordError;
use crate::event::{EventKey, RawEvent};
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

const RECEIPT_PREFIX: &str = "spend:";

/// Opaque proof of a successful ledger write
///
/// Format: `spend:<event key>[@<location>]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Receipt(String);

impl Receipt {
    /// Receipt token written into the row before the append
    #[must_use]
    pub fn token_for(key: &EventKey) -> Self {
        Self(format!("{RECEIPT_PREFIX}{key}"))
    }

    /// Receipt for a row written at `location` (row index, line number, ...)
    #[must_use]
    pub fn at(token: &str, location: impl fmt::Display) -> Self {
        Self(format!("{token}@{location}"))
    }

    /// Wrap an existing receipt string
    #[inline]
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Recover the event key embedded in the receipt
    #[must_use]
    pub fn event_key(&self) -> Option<EventKey> {
        let body = self.0.strip_prefix(RECEIPT_PREFIX)?;
        let key = body.split_once('@').map_or(body, |(key, _)| key);
        EventKey::parse(key)
    }

    /// String form
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of the external spend ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    /// Message timestamp
    pub ts: DateTime<Utc>,
    /// Chat/group identifier
    pub chat_id: String,
    /// Channel message id, when present
    pub message_id: Option<String>,
    /// Author identifier
    pub author_id: String,
    /// Author display name
    pub author_name: String,
    /// Item text
    pub item: String,
    /// Total price
    pub price: Decimal,
    /// Currency
    pub currency: String,
    /// Category
    pub category: Category,
    /// Project code
    pub project_code: String,
    /// Quantity, when stated
    pub quantity: Option<u32>,
    /// Vendor, when stated
    pub vendor: Option<String>,
    /// Notes, when stated
    pub notes: Option<String>,
    /// Message text the record came from
    pub raw_text: String,
    /// Receipt token embedding the event key
    pub receipt: String,
}

impl LedgerRow {
    /// Column order of the ledger table
    pub const COLUMNS: [&'static str; 15] = [
        "ts_iso",
        "chat_id",
        "message_id",
        "author_id",
        "author_name",
        "item",
        "price",
        "currency",
        "category",
        "project_code",
        "notes",
        "raw_text",
        "receipt",
        "quantity",
        "vendor",
    ];

    /// Build the row for a complete record
    ///
    /// # Errors
    /// Returns [`RecordError::Incomplete`] if any required value is absent.
    pub fn from_candidate(
        event: &RawEvent,
        key: &EventKey,
        record: &CandidateRecord,
    ) -> Result<Self, RecordError> {
        let missing: Vec<RequiredField> = record.missing_fields(0.0);
        if !missing.is_empty() {
            return Err(RecordError::Incomplete { missing });
        }
        let incomplete = || RecordError::Incomplete {
            missing: record.missing_fields(0.0),
        };

        Ok(Self {
            ts: event.timestamp,
            chat_id: event.channel_id.clone(),
            message_id: event.event_id.clone(),
            author_id: event.author_id.clone(),
            author_name: event.author_display_name.clone(),
            item: record.item.get().ok_or_else(incomplete)?.clone(),
            price: *record.amount.get().ok_or_else(incomplete)?,
            currency: record.currency.get().ok_or_else(incomplete)?.clone(),
            category: *record.category.get().ok_or_else(incomplete)?,
            project_code: record.project_code.get().ok_or_else(incomplete)?.clone(),
            quantity: record.quantity.get().copied(),
            vendor: record.vendor.get().cloned(),
            notes: record.notes.get().cloned(),
            raw_text: record.source_text.trim().to_string(),
            receipt: Receipt::token_for(key).as_str().to_string(),
        })
    }

    /// Summary for confirmations
    #[must_use]
    pub fn summary(&self) -> Summary {
        Summary {
            item: self.item.clone(),
            amount: self.price,
            currency: self.currency.clone(),
            project_code: Some(self.project_code.clone()),
        }
    }

    /// Event key embedded in the receipt column
    #[must_use]
    pub fn event_key(&self) -> Option<EventKey> {
        Receipt::from_raw(self.receipt.clone()).event_key()
    }

    /// Positional values in [`Self::COLUMNS`] order
    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        let opt = |v: &Option<String>| Value::String(v.clone().unwrap_or_default());
        vec![
            Value::String(self.ts.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Value::String(self.chat_id.clone()),
            opt(&self.message_id),
            Value::String(self.author_id.clone()),
            Value::String(self.author_name.clone()),
            Value::String(self.item.clone()),
            serde_json::Number::from_str(&self.price.normalize().to_string())
                .map_or_else(|_| Value::String(self.price.to_string()), Value::Number),
            Value::String(self.currency.clone()),
            Value::String(self.category.label().to_string()),
            Value::String(self.project_code.clone()),
            opt(&self.notes),
            Value::String(self.raw_text.clone()),
            Value::String(self.receipt.clone()),
            self.quantity.map_or(Value::String(String::new()), Value::from),
            opt(&self.vendor),
        ]
    }

    /// Parse positional values read back from the ledger table
    ///
    /// # Errors
    /// Returns [`RecordError::MalformedRow`] on missing columns or unparseable
    /// timestamp, price or category.
    pub fn from_values(values: &[Value]) -> Result<Self, RecordError> {
        let text = |idx: usize| -> String {
            match values.get(idx) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            }
        };
        let non_empty = |idx: usize| Some(text(idx)).filter(|s| !s.is_empty());

        if values.len() < 13 {
            return Err(RecordError::MalformedRow(format!(
                "expected at least 13 columns, got {}",
                values.len()
            )));
        }

        let ts = DateTime::parse_from_rfc3339(&text(0))
            .map_err(|e| RecordError::MalformedRow(format!("ts_iso: {e}")))?
            .with_timezone(&Utc);
        let price = Decimal::from_str(&text(6))
            .or_else(|_| Decimal::from_scientific(&text(6)))
            .map_err(|e| RecordError::MalformedRow(format!("price: {e}")))?;
        let category = Category::from_label(&text(8))
            .ok_or_else(|| RecordError::MalformedRow(format!("category: {}", text(8))))?;

        Ok(Self {
            ts,
            chat_id: text(1),
            message_id: non_empty(2),
            author_id: text(3),
            author_name: text(4),
            item: text(5),
            price,
            currency: text(7),
            category,
            project_code: text(9),
            notes: non_empty(10),
            raw_text: text(11),
            receipt: text(12),
            quantity: non_empty(13).and_then(|q| q.parse().ok()),
            vendor: non_empty(14),
        })
    }
}
