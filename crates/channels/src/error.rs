/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed channel errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The channel id is not present in the registry.
    #[error("channel not found: {channel_id}")]
    ChannelNotFound { channel_id: String },

    /// The channel exists but has not finished authenticating.
    #[error("channel not ready: {channel_id}")]
    ChannelNotReady { channel_id: String },

    /// The client rejected the message or could not complete delivery.
    #[error("send failed: {message}")]
    SendFailed { message: String },

    /// The client failed to start.
    #[error("channel initialization failed: {message}")]
    InitializationFailed { message: String },

    #[error("invalid channel input: {message}")]
    InvalidInput { message: String },
}

impl Error {
    #[must_use]
    pub fn not_found(channel_id: impl std::fmt::Display) -> Self {
        Self::ChannelNotFound {
            channel_id: channel_id.to_string(),
        }
    }

    #[must_use]
    pub fn not_ready(channel_id: impl std::fmt::Display) -> Self {
        Self::ChannelNotReady {
            channel_id: channel_id.to_string(),
        }
    }

    #[must_use]
    pub fn send_failed(message: impl std::fmt::Display) -> Self {
        Self::SendFailed {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn init_failed(message: impl std::fmt::Display) -> Self {
        Self::InitializationFailed {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    /// Whether the failure means the channel itself is unusable rather than
    /// the single message being rejected.
    #[must_use]
    pub fn is_channel_unavailable(&self) -> bool {
        matches!(
            self,
            Self::ChannelNotFound { .. } | Self::ChannelNotReady { .. }
        )
    }
}
