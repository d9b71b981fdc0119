//! Session backed by a WebSocket connection's outbound queue.
//!
//! The transport owns the socket and drains the receiving end of the queue
//! into it; the hub only ever pushes frames through `send`.

use tokio::sync::mpsc::UnboundedSender;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::session::Session;
use crate::utils::error::SessionError;

#[derive(Debug)]
pub struct ClientSession {
    pub id: String,
    pub sender: UnboundedSender<WsMessage>,
}

impl ClientSession {
    /// Create a session with a fresh UUID as its id.
    pub fn new(sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
        }
    }
}

impl Session for ClientSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, payload: &[u8]) -> Result<(), SessionError> {
        let text = std::str::from_utf8(payload).map_err(|_| SessionError::NotUtf8)?;
        self.sender
            .send(WsMessage::text(text.to_owned()))
            .map_err(|_| SessionError::Closed(self.id.clone()))
    }
}
