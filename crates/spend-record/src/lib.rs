//! Spend record data model
//!
//! Typed values shared by every stage of the ingestion pipeline.
//!
//! # Core Concepts
//!
//! - [`RawEvent`]: a chat message as delivered, never mutated
//! - [`EventKey`]: deterministic idempotency key for an event
//! - [`FieldValue<T>`]: extracted value with confidence and provenance
//! - [`CandidateRecord`]: confidence-scored record, appendable once complete
//! - [`LedgerRow`] / [`Receipt`]: the external row and proof of its write
//! - [`Vocabulary`]: closed sets (triggers, currencies, categories, projects)
//!
//! # Example
//!
//! ```rust,ignore
//! use spend_record::{EventKey, RawEvent};
//!
//! let event = RawEvent::new("chat", "author", timestamp, "buy tips $20 DE")
//!     .with_event_id("42");
//! assert_eq!(event.key(window).as_str(), "msg:chat:42");
//! ```

#![warn(unreachable_pub)]

mod candidate;
mod error;
mod event;
mod field;
mod ledger_row;
mod vocabulary;

pub use candidate::{CandidateRecord, Category, RequiredField, Summary};
pub use error::RecordError;
pub use event::{normalize_text, EventKey, RawEvent};
pub use field::{FieldValue, Provenance};
pub use ledger_row::{LedgerRow, Receipt};
pub use vocabulary::{normalize_code, CategoryTable, Vocabulary};

/// Decimal type used for amounts
pub use rust_decimal::Decimal;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
