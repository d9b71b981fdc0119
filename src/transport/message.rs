use serde::{Deserialize, Serialize};

/// Frames a client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Must be the first frame of a connection.
    Auth {
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    Presence {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },

    Chat { recipient_id: String, msg: String },

    /// The client received `message_id`.
    Ack { message_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    Success,
    Failed,
}

/// Control frames the server sends. Delivered chat messages and
/// notifications are not wrapped in these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    AuthAck {
        status: AuthStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    Error { message: String },
}

impl ServerMessage {
    pub fn auth_success(user_id: &str) -> Self {
        ServerMessage::AuthAck {
            status: AuthStatus::Success,
            user_id: Some(user_id.to_string()),
            error: None,
        }
    }

    pub fn auth_failed(error: impl Into<String>) -> Self {
        ServerMessage::AuthAck {
            status: AuthStatus::Failed,
            user_id: None,
            error: Some(error.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}
