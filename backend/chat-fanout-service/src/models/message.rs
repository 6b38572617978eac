use super::FanoutMessage;
use crate::error::FanoutError;
use serde::{Deserialize, Serialize};

/// A chat line after sender attribution.
///
/// Client wire convention: `@<target> <body>` is directed, anything else is a
/// broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMessage {
    Broadcast {
        sender: String,
        body: String,
    },
    Directed {
        sender: String,
        target: String,
        body: String,
    },
}

impl ChatMessage {
    /// Parse a raw client line authored by `sender`.
    pub fn parse(sender: impl Into<String>, line: &str) -> Result<Self, FanoutError> {
        let sender = sender.into();
        match line.strip_prefix('@') {
            Some(rest) => {
                let (target, body) = rest
                    .split_once(' ')
                    .ok_or_else(|| FanoutError::MalformedTarget(line.to_string()))?;
                Ok(ChatMessage::Directed {
                    sender,
                    target: target.to_string(),
                    body: body.to_string(),
                })
            }
            None => Ok(ChatMessage::Broadcast {
                sender,
                body: line.to_string(),
            }),
        }
    }

    pub fn sender(&self) -> &str {
        match self {
            ChatMessage::Broadcast { sender, .. } | ChatMessage::Directed { sender, .. } => sender,
        }
    }

    /// Broadcasts are visible to everyone; directed messages only to the
    /// target and to the sender.
    pub fn is_visible_to(&self, viewer: &str) -> bool {
        match self {
            ChatMessage::Broadcast { .. } => true,
            ChatMessage::Directed { sender, target, .. } => viewer == target || viewer == sender,
        }
    }

    /// The client line this message was parsed from.
    pub fn wire_payload(&self) -> String {
        match self {
            ChatMessage::Broadcast { body, .. } => body.clone(),
            ChatMessage::Directed { target, body, .. } => format!("@{target} {body}"),
        }
    }

    /// Text pushed to a recipient connection.
    pub fn render(&self) -> String {
        match self {
            ChatMessage::Broadcast { sender, body } => format!("({sender})(all): {body}"),
            ChatMessage::Directed { sender, .. } => {
                format!("({sender}): {}", self.wire_payload())
            }
        }
    }

    pub fn to_envelope(&self) -> BrokerEnvelope {
        BrokerEnvelope {
            payload: self.wire_payload(),
            user: self.sender().to_string(),
        }
    }
}

impl FanoutMessage for ChatMessage {
    const TOPIC: &'static str = "chat";

    fn decode(payload: &str) -> Result<Self, FanoutError> {
        BrokerEnvelope::from_json(payload)?.into_message()
    }

    fn render_for(&self, viewer: &str) -> Result<Option<String>, FanoutError> {
        Ok(self.is_visible_to(viewer).then(|| self.render()))
    }
}

/// Chat message as it travels over the broker: the raw client line plus the
/// sender identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerEnvelope {
    pub payload: String,
    #[serde(default)]
    pub user: String,
}

impl BrokerEnvelope {
    pub fn to_json(&self) -> Result<String, FanoutError> {
        serde_json::to_string(self).map_err(|e| FanoutError::Serialization(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, FanoutError> {
        serde_json::from_str(raw).map_err(|e| FanoutError::DecodeFailure(e.to_string()))
    }

    pub fn into_message(self) -> Result<ChatMessage, FanoutError> {
        ChatMessage::parse(self.user, &self.payload).map_err(|e| match e {
            FanoutError::MalformedTarget(line) => {
                FanoutError::DecodeFailure(format!("malformed directed target in {line:?}"))
            }
            other => other,
        })
    }
}
