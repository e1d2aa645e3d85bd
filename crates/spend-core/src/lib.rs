//! Spend Core - idempotent ingestion of chat-reported purchases
//!
//! Ties the pipeline together:
//! - [`Orchestrator`]: extraction, clarification, dedupe, append, confirm
//! - [`ClarificationTracker`]: one pending question per author
//! - [`Channel`]: where questions and confirmations go
//! - [`IngestConfig`]: TOML configuration for every stage
//!
//! # Example
//!
//! ```rust,ignore
//! use spend_core::{IngestConfig, Orchestrator, StdoutChannel};
//! use spend_record::RawEvent;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IngestConfig::from_file("spendlog.toml")?;
//! let pipeline = Orchestrator::from_config(config, Arc::new(StdoutChannel))?;
//! pipeline.recover().await?;
//!
//! let event = RawEvent::new("-100371", "999", chrono::Utc::now(), "buy gloves 132.78 AUD Pursuit consumables")
//!     .with_event_id("42");
//! let outcome = pipeline.handle_event(event).await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod channel;
pub mod config;
pub mod error;
pub mod messages;
pub mod orchestrator;
pub mod state;
pub mod tracker;

pub use channel::{Channel, StdoutChannel};
pub use config::{
    ClarificationConfig, DedupeConfig, ExtractionConfig, IngestConfig, LedgerBackend, LedgerConfig,
    LoggingConfig,
};
pub use error::{ChannelError, ConfigError, IngestError, TrackerError};
pub use orchestrator::{Orchestrator, Outcome, RecoveryReport};
pub use state::{allowed_transitions, validate_transition, IngestState};
pub use tracker::{ClarificationHandle, ClarificationTracker, PendingClarification, Resolution};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
