//! Relay protocol messages.
//!
//! Inbound frames are JSON arrays of objects discriminated by `"type"`;
//! outbound frames are single objects discriminated by `"action"`.

use crate::RelayResult;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// An application message relayed between session members.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayMessage {
    /// Slot index of the sender.
    pub member_num: u32,
    pub payload: String,
    pub pinned: bool,
    /// Milliseconds since the Unix epoch, assigned by the relay.
    pub time: i64,
}

impl RelayMessage {
    /// A zero timestamp marks a placeholder rather than a real message.
    pub fn is_present(&self) -> bool {
        self.time != 0
    }
}

/// Inbound message kinds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Server-assigned durable identity for this client.
    #[serde(rename_all = "camelCase")]
    Connection { member_id: String },
    /// Another client took over this identity.
    ConnectionOverwrite,
    Heartbeat,
    /// The server rejected this connection; reconnect from scratch.
    InvalidConnection,
    #[serde(rename_all = "camelCase")]
    MemberDisconnect { member_num: u32 },
    #[serde(rename_all = "camelCase")]
    MemberReconnect { member_num: u32 },
    Message(RelayMessage),
    /// A private session was created; the id doubles as its share code.
    #[serde(rename_all = "camelCase")]
    PrivateSessionPending { session_id: String },
    SessionEnd,
    #[serde(rename_all = "camelCase")]
    SessionReconnect {
        member_num: u32,
        #[serde(default)]
        members: Vec<bool>,
        #[serde(default)]
        pinned_message: Option<RelayMessage>,
    },
    #[serde(rename_all = "camelCase")]
    SessionStart {
        session_type: String,
        session_id: String,
        num_members: u32,
        member_num: u32,
    },
    /// Any type this client does not know about.
    #[serde(other)]
    Unknown,
}

/// Parse one inbound text frame.
///
/// Fails if the frame is not a JSON array or any element is malformed, in
/// which case the whole frame is dropped. Elements with an unknown `type`
/// are logged and skipped.
pub fn parse_frame(text: &str) -> RelayResult<Vec<ServerMessage>> {
    let raw: Vec<serde_json::Value> = serde_json::from_str(text)?;
    let mut messages = Vec::with_capacity(raw.len());

    for value in raw {
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();

        match serde_json::from_value::<ServerMessage>(value)? {
            ServerMessage::Unknown => warn!(msg_type = %kind, "Unhandled message type"),
            message => messages.push(message),
        }
    }

    Ok(messages)
}

/// What a heartbeat asks the relay to (re)send while the session is not ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitingFor {
    PrivateSessionPending,
    SessionStart,
    SessionReconnect,
}

/// Outbound frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientAction {
    SendMessage {
        payload: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        pinned: bool,
    },
    #[serde(rename_all = "camelCase")]
    Heartbeat {
        /// Cursor: resend anything newer than this message time.
        incl_messages_after: i64,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        waiting_for: Vec<WaitingFor>,
    },
    EndSession,
}

impl ClientAction {
    /// Create a SEND_MESSAGE frame.
    pub fn send_message(payload: impl Into<String>, pinned: bool) -> Self {
        Self::SendMessage {
            payload: payload.into(),
            pinned,
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> RelayResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
