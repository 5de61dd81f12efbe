use serde::{Deserialize, Serialize};

/// One explicit recipient/message pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub recipient: String,
    pub body: String,
}

impl OutboundMessage {
    pub fn new(recipient: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            body: body.into(),
        }
    }
}

/// The ordered work of a run.
///
/// A broadcast is the degenerate case of pairs where every item shares the
/// same body; both are consumed through [`MessageSource::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageSource {
    Broadcast {
        body: String,
        recipients: Vec<String>,
    },
    Pairs(Vec<OutboundMessage>),
}

impl MessageSource {
    pub fn broadcast<I, S>(body: impl Into<String>, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Broadcast {
            body: body.into(),
            recipients: recipients.into_iter().map(Into::into).collect(),
        }
    }

    pub fn pairs(messages: Vec<OutboundMessage>) -> Self {
        Self::Pairs(messages)
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Broadcast { recipients, .. } => recipients.len(),
            Self::Pairs(messages) => messages.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(recipient, body)` at position `index`.
    pub fn get(&self, index: usize) -> Option<(&str, &str)> {
        match self {
            Self::Broadcast { body, recipients } => {
                recipients.get(index).map(|r| (r.as_str(), body.as_str()))
            },
            Self::Pairs(messages) => messages
                .get(index)
                .map(|m| (m.recipient.as_str(), m.body.as_str())),
        }
    }
}
