//! In-process producer
//!
//! Plays the part of the chat-processing service for the bundled server:
//! every chat message is persisted as undelivered before it is published, so
//! a recipient who is offline (or whose subscription is being rebuilt) can
//! still get it from the reconciler. A recipient's client acknowledges what it
//! received, which is what finally marks the record delivered.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::Broker;
use crate::broker::message::{ChatMessage, NotificationMessage};
use crate::persistence::SledStore;
use crate::utils::error::ProducerError;

/// Notification sub-type announcing the recipient's undelivered total.
pub const INBOX_SUB_TYPE: &str = "inbox";

const CHAT_KIND: &str = "text";

pub struct Producer {
    store: Arc<SledStore>,
    broker: Arc<dyn Broker>,
}

impl Producer {
    pub fn new(store: Arc<SledStore>, broker: Arc<dyn Broker>) -> Self {
        Self { store, broker }
    }

    /// Persist and publish a chat message, then publish the recipient's inbox
    /// count. Nobody listening is not an error. Once the message is published
    /// a failing notification is only logged, so the caller never retries a
    /// message that already went out.
    pub fn send(
        &self,
        sender: &str,
        recipient: &str,
        content: &str,
    ) -> Result<ChatMessage, ProducerError> {
        let message = ChatMessage {
            message_id: Uuid::new_v4().to_string(),
            sender_id: sender.to_string(),
            recipient_id: recipient.to_string(),
            content: content.to_string(),
            timestamp: Some(Utc::now()),
            kind: CHAT_KIND.to_string(),
        };
        self.store.save_undelivered(&message)?;

        let listeners = self
            .broker
            .publish(recipient, Bytes::from(serde_json::to_vec(&message)?))?;
        info!(message_id = %message.message_id, recipient, listeners, "chat message published");

        if let Err(e) = self.notify_inbox(recipient) {
            warn!(message_id = %message.message_id, recipient, error = %e, "failed to publish inbox notification");
        }
        Ok(message)
    }

    fn notify_inbox(&self, recipient: &str) -> Result<usize, ProducerError> {
        let pending = self.store.count_undelivered(recipient)?;
        self.notify(recipient, INBOX_SUB_TYPE, i64::try_from(pending).unwrap_or(i64::MAX))
    }

    pub fn notify(
        &self,
        recipient: &str,
        sub_type: &str,
        count: i64,
    ) -> Result<usize, ProducerError> {
        let notification = NotificationMessage::new(recipient, sub_type, count);
        let listeners = self
            .broker
            .publish(recipient, Bytes::from(serde_json::to_vec(&notification)?))?;
        debug!(recipient, sub_type, count, listeners, "notification published");
        Ok(listeners)
    }

    /// Mark a message delivered after `recipient` acknowledged it. Only the
    /// message's own recipient can do so.
    pub fn acknowledge(&self, recipient: &str, message_id: &str) -> Result<bool, ProducerError> {
        let updated = self.store.mark_delivered(recipient, message_id)?;
        if updated {
            debug!(recipient, message_id, "delivery acknowledged");
        } else {
            debug!(recipient, message_id, "acknowledgement ignored");
        }
        Ok(updated)
    }
}
