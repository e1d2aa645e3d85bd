//! Outbound side of the chat transport

use crate::error::ChannelError;
use async_trait::async_trait;
use std::io::Write;

/// Where questions and confirmations are sent
#[async_trait]
pub trait Channel: Send + Sync {
    /// Post `text` to `channel_id`
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), ChannelError>;
}

/// Writes messages to stdout as `[<channel>] <text>`; used by the CLI
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutChannel;

#[async_trait]
impl Channel for StdoutChannel {
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), ChannelError> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "[{channel_id}] {text}").map_err(|e| ChannelError::Send {
            channel_id: channel_id.to_string(),
            reason: e.to_string(),
        })
    }
}
