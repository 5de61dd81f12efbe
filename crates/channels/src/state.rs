use serde::Serialize;

/// Lifecycle state of a channel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Not present in the registry.
    Uninitialized,
    Initializing,
    AwaitingAuth,
    Ready,
    Disconnected,
    Stopped,
}

impl ChannelState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::AwaitingAuth => "awaiting_auth",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a session, published on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSnapshot {
    pub state: ChannelState,
    /// Pending auth challenge, only set while `AwaitingAuth`.
    pub challenge: Option<String>,
    pub account: Option<String>,
}

impl ChannelSnapshot {
    pub(crate) fn initializing(account: Option<String>) -> Self {
        Self {
            state: ChannelState::Initializing,
            challenge: None,
            account,
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == ChannelState::Ready
    }
}
