use {anyhow::Result, async_trait::async_trait};

/// Persistence hook used by sessions when a client reports its account.
#[async_trait]
pub trait SenderStore: Send + Sync {
    /// Record `account` as the channel's bound account if none is recorded
    /// yet. Returns `true` when the value was written.
    async fn bind_account(&self, channel_id: &str, account: &str) -> Result<bool>;
}
