use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HubError;

/// Raw inbound frame. Any sender fields a client adds are ignored.
#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    receiver_id: String,
    #[serde(default)]
    content: String,
}

/// Decoded inbound event. Sender identity is never part of it: the hub
/// attaches the authenticated session's identity when routing.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Message { receiver_id: String, content: String },
    Typing { receiver_id: String },
    StopTyping { receiver_id: String },
    UserListRequest,
    Unknown(String),
}

impl ClientEvent {
    pub fn decode(raw: &[u8]) -> Result<Self, HubError> {
        let frame: InboundFrame = serde_json::from_slice(raw)?;
        Ok(match frame.kind.as_str() {
            "message" => ClientEvent::Message {
                receiver_id: frame.receiver_id,
                content: frame.content,
            },
            "typing" => ClientEvent::Typing { receiver_id: frame.receiver_id },
            "stop_typing" => ClientEvent::StopTyping { receiver_id: frame.receiver_id },
            "user_list_request" => ClientEvent::UserListRequest,
            _ => ClientEvent::Unknown(frame.kind),
        })
    }
}

/// A persisted chat message as relayed to both parties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub sender_id: String,
    pub sender_name: String,
    pub receiver_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingSignal {
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub receiver_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Message(ChatMessage),
    NewMessageNotification {
        sender_id: String,
        sender_name: String,
        content: String,
    },
    Typing(TypingSignal),
    StopTyping(TypingSignal),
    /// `content` carries the roster as a JSON-encoded array.
    UserList { content: String },
}

impl ServerEvent {
    pub fn notification_for(message: &ChatMessage) -> Self {
        ServerEvent::NewMessageNotification {
            sender_id: message.sender_id.clone(),
            sender_name: message.sender_name.clone(),
            content: message.content.clone(),
        }
    }

    /// Typing signals are best-effort and subject to per-session throttling.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, ServerEvent::Typing(_) | ServerEvent::StopTyping(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Message(_) => "message",
            ServerEvent::NewMessageNotification { .. } => "new_message_notification",
            ServerEvent::Typing(_) => "typing",
            ServerEvent::StopTyping(_) => "stop_typing",
            ServerEvent::UserList { .. } => "user_list",
        }
    }

    pub fn encode(&self) -> Result<String, HubError> {
        Ok(serde_json::to_string(self)?)
    }
}
