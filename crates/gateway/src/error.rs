use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors returned by the request layer. Each maps to one HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid room token or website url")]
    Unauthorized,

    #[error("room is inactive")]
    RoomInactive,

    #[error("no active senders in this room")]
    NoActiveSenders,

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("{message}")]
    InvalidInput { message: String },

    #[error(transparent)]
    Dispatch(#[from] herald_dispatch::Error),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl GatewayError {
    #[must_use]
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RoomInactive | Self::NoActiveSenders | Self::InvalidInput { .. } => {
                StatusCode::BAD_REQUEST
            },
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Dispatch(herald_dispatch::Error::InvalidInput { .. }) => StatusCode::BAD_REQUEST,
            Self::Dispatch(herald_dispatch::Error::Store { .. }) | Self::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }

    /// Stable label for metrics and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::RoomInactive => "room_inactive",
            Self::NoActiveSenders => "no_active_senders",
            Self::NotFound { .. } => "not_found",
            Self::InvalidInput { .. } | Self::Dispatch(herald_dispatch::Error::InvalidInput { .. }) => {
                "invalid_input"
            },
            Self::Dispatch(herald_dispatch::Error::Store { .. }) | Self::Store(_) => "store",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
