//! Seam between channel sessions and the external messaging client.

use std::sync::Arc;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::sync::mpsc,
};

use crate::Result;

/// Per-channel client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Identity under which the client persists its local auth state.
    pub client_id: String,
    /// Account (phone number) already bound to this channel, if known.
    #[serde(default)]
    pub account: Option<String>,
}

impl ChannelConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            account: None,
        }
    }

    #[must_use]
    pub fn with_account(mut self, account: Option<String>) -> Self {
        self.account = account;
        self
    }
}

/// Lifecycle notifications emitted by a running client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Authentication challenge to present to the user (QR payload).
    Challenge(String),
    Authenticated,
    AuthFailure(String),
    /// Client is operational. `account` is the identity it logged in as.
    Ready { account: Option<String> },
    /// Session terminated by the client or the network.
    Disconnected { reason: String },
}

/// A started messaging client.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Deliver `text` to a fully-qualified address. Resolves once the
    /// client's send API has accepted the message.
    async fn send(&self, to: &str, text: &str) -> Result<()>;

    /// Release client resources. Must be safe to call more than once.
    async fn shutdown(&self);
}

/// A running client plus the stream of its lifecycle events.
pub struct ClientHandle {
    pub client: Arc<dyn MessagingClient>,
    pub events: mpsc::Receiver<ClientEvent>,
}

/// Starts messaging clients on behalf of the registry.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn start(&self, channel_id: &str, config: &ChannelConfig) -> Result<ClientHandle>;
}
