//! Wire event model.
//!
//! One JSON object per WebSocket text frame, tagged by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::receipts::ReceiptKind;
use crate::status::MessageStatus;

/// Sender name carried by presence announcements.
pub const SYSTEM_IDENTITY: &str = "system";

/// A chat message as it travels on the wire and sits in history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: String,
    pub from: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl MessagePayload {
    pub fn new(
        id: impl Into<String>,
        from: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// A presence announcement with a generated id.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), SYSTEM_IDENTITY, content)
    }
}

/// Statuses an `ack` event can carry to a sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Received,
    Delivered,
    Seen,
}

/// Payload of a `status` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub message_id: String,
    pub delivered_count: usize,
    pub seen_count: usize,
    pub total_participants: usize,
    pub status: MessageStatus,
}

/// Inbound client events, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientEvent {
    /// New chat message. A missing id is assigned server side.
    Message {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        content: String,
    },
    /// The sending identity has read a message.
    Seen {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    /// Explicit receipt for a message.
    Ack {
        #[serde(rename = "messageId")]
        message_id: String,
        status: ReceiptKind,
    },
    /// Typing indicator, relayed verbatim.
    Typing {
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// Presence announcement, relayed verbatim.
    Join {
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// Catch-all for event types this server does not understand.
    #[serde(other)]
    Unknown,
}

/// Outbound server events, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEvent {
    Message {
        message: MessagePayload,
    },
    Ack {
        #[serde(rename = "messageId")]
        message_id: String,
        status: AckStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        by: Option<String>,
    },
    Status {
        payload: StatusPayload,
    },
    System {
        message: MessagePayload,
    },
    History {
        messages: Vec<MessagePayload>,
    },
    Typing {
        payload: serde_json::Value,
    },
    Join {
        payload: serde_json::Value,
    },
    Error {
        message: String,
    },
}
