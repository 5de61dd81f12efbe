//! JSON text frames exchanged with the sidecar.

use serde::{Deserialize, Serialize};

/// Frames herald sends to the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayFrame {
    /// Start (or resume) a WhatsApp Web session persisted under `client_id`.
    Login {
        account_id: String,
        client_id: String,
    },
    Logout {
        account_id: String,
    },
    Send {
        request_id: String,
        account_id: String,
        to: String,
        text: String,
    },
}

/// Frames the sidecar sends to herald.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarFrame {
    Qr {
        account_id: String,
        qr: String,
    },
    Authenticated {
        account_id: String,
    },
    AuthFailure {
        account_id: String,
        #[serde(default)]
        message: String,
    },
    Ready {
        account_id: String,
        #[serde(default)]
        phone_number: Option<String>,
    },
    Disconnected {
        account_id: String,
        #[serde(default)]
        reason: String,
    },
    SendResult {
        request_id: String,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Error {
        #[serde(default)]
        account_id: Option<String>,
        error: String,
    },
}

impl SidecarFrame {
    /// Account the frame is about, if it is routed to a session.
    #[must_use]
    pub fn account_id(&self) -> Option<&str> {
        match self {
            Self::Qr { account_id, .. }
            | Self::Authenticated { account_id }
            | Self::AuthFailure { account_id, .. }
            | Self::Ready { account_id, .. }
            | Self::Disconnected { account_id, .. } => Some(account_id),
            Self::Error { account_id, .. } => account_id.as_deref(),
            Self::SendResult { .. } => None,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_frame_shape() {
        let frame = GatewayFrame::Send {
            request_id: "r1".into(),
            account_id: "s1".into(),
            to: "6281@c.us".into(),
            text: "hi".into(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "send");
        assert_eq!(json["to"], "6281@c.us");
    }

    #[test]
    fn parses_ready_without_phone() {
        let frame: SidecarFrame =
            serde_json::from_str(r#"{"type":"ready","account_id":"s1"}"#).unwrap();
        assert_eq!(frame, SidecarFrame::Ready {
            account_id: "s1".into(),
            phone_number: None,
        });
        assert_eq!(frame.account_id(), Some("s1"));
    }

    #[test]
    fn parses_failed_send_result() {
        let frame: SidecarFrame = serde_json::from_str(
            r#"{"type":"send_result","request_id":"r9","success":false,"error":"not on whatsapp"}"#,
        )
        .unwrap();
        assert!(frame.account_id().is_none());
        let SidecarFrame::SendResult { success, error, .. } = frame else {
            panic!("wrong variant");
        };
        assert!(!success);
        assert_eq!(error.as_deref(), Some("not on whatsapp"));
    }

    #[test]
    fn unknown_frame_type_is_an_error() {
        assert!(serde_json::from_str::<SidecarFrame>(r#"{"type":"typing"}"#).is_err());
    }
}
