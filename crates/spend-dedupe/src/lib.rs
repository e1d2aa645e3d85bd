//! Spend Dedupe - exactly-once bookkeeping for spend events
//!
//! Provides:
//! - [`DedupeStore`]: durable `reserve` / `commit` / `fail` per event key
//! - [`lookup_by_content`]: find an event's row in the ledger, by the key
//!   in its receipt or by [`ContentQuery`]
//! - [`rebuild_from_ledger`]: restore committed keys from ledger rows
//!
//! A key is committed at most once, and only with the receipt of a real
//! ledger append.

#![warn(unreachable_pub)]

pub mod error;
pub mod reconcile;
pub mod store;

pub use error::DedupeError;
pub use reconcile::{lookup_by_content, rebuild_from_ledger, ContentQuery, ReconcileReport};
pub use store::{DedupeRecord, DedupeStatus, DedupeStore, ReserveOutcome};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
