use async_trait::async_trait;

use crate::Result;

/// What the dispatcher needs from the channel layer.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    /// Absent channels are not ready.
    fn is_ready(&self, channel_id: &str) -> bool;

    /// Send one message through a channel. Fails with `ChannelNotFound`,
    /// `ChannelNotReady` or `SendFailed`.
    async fn send(&self, channel_id: &str, recipient: &str, body: &str) -> Result<()>;
}
