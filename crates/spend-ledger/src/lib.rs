//! Spend Ledger - append port for the external spend ledger
//!
//! Provides:
//! - [`LedgerStore`]: the single-attempt backend seam
//! - [`LedgerPort`]: table binding, bounded retry with backoff and
//!   per-request timeouts, receipt construction
//! - Backends: [`MemoryLedger`], [`JsonlLedger`], [`HttpTableLedger`]
//!
//! The port does not deduplicate. Two calls with the same row append two
//! rows; idempotency is enforced upstream.

#![warn(unreachable_pub)]

pub mod backends;
pub mod error;
pub mod port;
pub mod retry;
pub mod store;

pub use backends::{HttpTableLedger, JsonlLedger, MemoryLedger};
pub use error::{AppendError, LedgerError};
pub use port::LedgerPort;
pub use retry::{with_retry, RetryPolicy};
pub use store::{LedgerStore, StoredRow};

#[cfg(test)]
pub use store::MockLedgerStore;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
