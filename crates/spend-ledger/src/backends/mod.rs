//! Ledger backends
//!
//! - [`MemoryLedger`]: in-process tables, for tests and dry runs
//! - [`JsonlLedger`]: one append-only JSON-lines file per table
//! - [`HttpTableLedger`]: a remote spreadsheet-style table API

mod http;
mod jsonl;
mod memory;

pub use http::HttpTableLedger;
pub use jsonl::JsonlLedger;
pub use memory::MemoryLedger;
