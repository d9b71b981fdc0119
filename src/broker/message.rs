//! Payload shapes carried on recipient channels.
//!
//! Two shapes share a channel and are told apart by the `type` field:
//! - `ChatMessage`: content addressed to a recipient, deduplicated by
//!   `messageId` before it reaches a session.
//! - `NotificationMessage`: `type == "notification"`, ephemeral and never
//!   deduplicated since a later notification supersedes an earlier one.
//!
//! The JSON is camelCase on the wire, matching what producers publish.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminant value marking a notification payload.
pub const NOTIFICATION_KIND: &str = "notification";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message_id: String,
    #[serde(default)]
    pub sender_id: String,
    pub recipient_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub sub_type: String,
    pub count: i64,
    pub recipient_id: String,
}

/// What a client sees for a notification; the routing key is stripped.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationFrame<'a> {
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub sub_type: &'a str,
    pub count: i64,
}

impl NotificationMessage {
    pub fn new(recipient_id: &str, sub_type: &str, count: i64) -> Self {
        Self {
            kind: NOTIFICATION_KIND.to_string(),
            sub_type: sub_type.to_string(),
            count,
            recipient_id: recipient_id.to_string(),
        }
    }

    pub fn frame(&self) -> NotificationFrame<'_> {
        NotificationFrame {
            kind: &self.kind,
            sub_type: &self.sub_type,
            count: self.count,
        }
    }
}

/// A decoded channel payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Chat(ChatMessage),
    Notification(NotificationMessage),
}

#[derive(Deserialize)]
struct Discriminant {
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

impl Payload {
    /// Decode raw channel bytes. Anything whose `type` is `notification`
    /// must be a complete notification; everything else must be a chat
    /// message with at least `messageId` and `recipientId`.
    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        let probe: Discriminant = serde_json::from_slice(raw)?;
        if probe.kind.as_deref() == Some(NOTIFICATION_KIND) {
            Ok(Payload::Notification(serde_json::from_slice(raw)?))
        } else {
            Ok(Payload::Chat(serde_json::from_slice(raw)?))
        }
    }

    pub fn recipient_id(&self) -> &str {
        match self {
            Payload::Chat(msg) => &msg.recipient_id,
            Payload::Notification(n) => &n.recipient_id,
        }
    }

    /// Short label for logs: the message id, or the notification sub-type.
    pub fn label(&self) -> &str {
        match self {
            Payload::Chat(msg) => &msg.message_id,
            Payload::Notification(n) => &n.sub_type,
        }
    }
}
