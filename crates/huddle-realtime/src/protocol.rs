//! Wire protocol for the realtime socket.
//!
//! Frames are JSON objects `{ "event": "<name>", "data": { ... } }` in both
//! directions. Inbound names parse into [`ClientEvent`]; names we do not
//! recognize become [`ClientEvent::Unknown`] so the router can drop them
//! without tearing down the socket. Outbound frames are [`ServerEvent`]
//! values stamped with a server-side RFC 3339 timestamp.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use huddle_core::{ChatId, GroupId, MessageId, PresenceState, UserId};

/// Errors turning an inbound text frame into a [`ClientEvent`].
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame was not a JSON object with an `event` field.
    #[error("malformed frame: {0}")]
    BadFrame(#[source] serde_json::Error),

    /// The event name was recognized but its payload did not deserialize.
    #[error("bad payload for {event}: {source}")]
    BadPayload {
        /// Event name the payload was for.
        event: String,
        /// Underlying deserialization failure.
        #[source]
        source: serde_json::Error,
    },
}

/// Raw envelope, before the payload is interpreted.
#[derive(Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Payload of `message:send`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSendPayload {
    /// Target chat.
    pub chat_id: ChatId,
    /// Message body.
    pub content: String,
    /// Message type; defaults to `"text"` when absent.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Opaque attachment descriptors, passed through verbatim.
    #[serde(default)]
    pub attachments: Vec<Value>,
}

/// Payload of `typing:start` and `typing:stop`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    /// Chat the typing indicator applies to.
    pub chat_id: ChatId,
}

/// Payload of `message:read`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReadPayload {
    /// Chat the message belongs to.
    pub chat_id: ChatId,
    /// The message that was read.
    pub message_id: MessageId,
}

/// Payload of `group:join` and `group:leave`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPayload {
    /// Group room to subscribe or unsubscribe.
    pub group_id: GroupId,
}

/// A parsed inbound event.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Send a message to a chat room.
    MessageSend(MessageSendPayload),
    /// Start a typing indicator in a chat.
    TypingStart(TypingPayload),
    /// Stop a typing indicator in a chat.
    TypingStop(TypingPayload),
    /// Mark a message as read.
    MessageRead(MessageReadPayload),
    /// Subscribe to a group room.
    GroupJoin(GroupPayload),
    /// Unsubscribe from a group room.
    GroupLeave(GroupPayload),
    /// Unrecognized event name; dropped by the router.
    Unknown(String),
}

impl ClientEvent {
    /// Parse a raw text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let frame: Frame = serde_json::from_str(text).map_err(ProtocolError::BadFrame)?;
        let bad = |event: &str| {
            let event = event.to_owned();
            move |source| ProtocolError::BadPayload { event, source }
        };
        Ok(match frame.event.as_str() {
            "message:send" => {
                Self::MessageSend(serde_json::from_value(frame.data).map_err(bad("message:send"))?)
            }
            "typing:start" => {
                Self::TypingStart(serde_json::from_value(frame.data).map_err(bad("typing:start"))?)
            }
            "typing:stop" => {
                Self::TypingStop(serde_json::from_value(frame.data).map_err(bad("typing:stop"))?)
            }
            "message:read" => {
                Self::MessageRead(serde_json::from_value(frame.data).map_err(bad("message:read"))?)
            }
            "group:join" => {
                Self::GroupJoin(serde_json::from_value(frame.data).map_err(bad("group:join"))?)
            }
            "group:leave" => {
                Self::GroupLeave(serde_json::from_value(frame.data).map_err(bad("group:leave"))?)
            }
            _ => Self::Unknown(frame.event),
        })
    }

    /// The wire name of this event.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::MessageSend(_) => "message:send",
            Self::TypingStart(_) => "typing:start",
            Self::TypingStop(_) => "typing:stop",
            Self::MessageRead(_) => "message:read",
            Self::GroupJoin(_) => "group:join",
            Self::GroupLeave(_) => "group:leave",
            Self::Unknown(name) => name,
        }
    }
}

/// An outbound event frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEvent {
    /// Event name, e.g. `message:receive`.
    pub event: String,
    /// Event payload.
    pub data: Value,
    /// Server clock at emit time, RFC 3339 with millisecond precision.
    pub timestamp: String,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl ServerEvent {
    /// Build an event with the current server timestamp.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            timestamp: now_rfc3339(),
        }
    }

    /// Handshake acknowledgement sent right after registration.
    #[must_use]
    pub fn connection_ready(user_id: &UserId) -> Self {
        Self::new("connection:ready", serde_json::json!({ "userId": user_id }))
    }

    /// A message delivered to a chat room.
    #[must_use]
    pub fn message_receive(
        chat_id: &ChatId,
        sender: &UserId,
        content: &str,
        kind: &str,
        attachments: &[Value],
    ) -> Self {
        Self::new(
            "message:receive",
            serde_json::json!({
                "chatId": chat_id,
                "sender": sender,
                "content": content,
                "type": kind,
                "attachments": attachments,
                "createdAt": now_rfc3339(),
            }),
        )
    }

    /// Typing indicator state for a chat.
    #[must_use]
    pub fn typing_update(chat_id: &ChatId, user_id: &UserId, is_typing: bool) -> Self {
        Self::new(
            "typing:update",
            serde_json::json!({
                "chatId": chat_id,
                "userId": user_id,
                "isTyping": is_typing,
            }),
        )
    }

    /// Read receipt for a message.
    #[must_use]
    pub fn message_read_update(chat_id: &ChatId, message_id: &MessageId, user_id: &UserId) -> Self {
        Self::new(
            "message:read:update",
            serde_json::json!({
                "chatId": chat_id,
                "messageId": message_id,
                "userId": user_id,
                "readAt": now_rfc3339(),
            }),
        )
    }

    /// Presence transition for a user.
    #[must_use]
    pub fn presence_update(user_id: &UserId, state: PresenceState) -> Self {
        Self::new(
            "presence:update",
            serde_json::json!({
                "userId": user_id,
                "status": state,
            }),
        )
    }

    /// Error report, delivered to the originating connection only.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new("error", serde_json::json!({ "message": message.into() }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
