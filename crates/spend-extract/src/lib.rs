//! Spend Extract - heuristic field extraction from chat messages
//!
//! Turns free text such as `buy gloves 132.78 AUD Pursuit consumables` into a
//! [`spend_record::CandidateRecord`] with a confidence and provenance per
//! field:
//! - amount and currency from symbol or token phrases
//! - quantity from `2x`, `x3`, `qty: 4`, `5 boxes`
//! - category from configured label and keyword tables
//! - project code from the closed set, with near-match and ambiguity
//! - vendor and notes from `from <Name>` and `note: ...`
//! - item from whatever text is left
//!
//! Clarification replies are merged into the prior candidate with
//! [`Extractor::extract`].

#![warn(unreachable_pub)]

mod amount;
mod category;
pub mod error;
mod extractor;
mod item;
mod patterns;
mod project;
mod quantity;
mod spans;

pub use error::ExtractError;
pub use extractor::Extractor;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
