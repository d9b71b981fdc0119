//! Hub engine
//!
//! The hub owns the recipient → session map and is the message handler of
//! every subscription. Registering a session also registers the recipient's
//! subscription and waits (bounded) for its confirmation, so "registration
//! complete" means "ready to receive".
//!
//! Dispatch rules:
//! - Notifications go straight to the session, never deduplicated.
//! - Content messages are delivered at most once per dedup window. The
//!   duplicate check and the claim on the message id are one atomic step, so
//!   two listeners racing on the same message cannot both write it.
//! - No live session is a successful no-op: the durable copy stays in the
//!   store for the reconciler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::broker::message::Payload;
use crate::hub::dedup::DedupRecord;
use crate::session::Session;
use crate::subscription::{MessageHandler, Readiness, SubscriptionManager};
use crate::utils::error::{DispatchError, SubscriptionError};

/// Successful outcome of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A content message was written to the session.
    Delivered,
    /// A notification was written to the session.
    Notified,
    /// Already delivered within the dedup window; nothing written.
    Duplicate,
    /// The recipient has no live session; nothing written.
    NoSession,
}

pub struct Hub {
    sessions: RwLock<HashMap<String, Arc<dyn Session>>>,
    dedup: Arc<DedupRecord>,
    subscriptions: Arc<SubscriptionManager>,
    confirm_timeout: Duration,
}

impl Hub {
    pub fn new(
        subscriptions: Arc<SubscriptionManager>,
        dedup: Arc<DedupRecord>,
        confirm_timeout: Duration,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            dedup,
            subscriptions,
            confirm_timeout,
        }
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    pub fn dedup(&self) -> &Arc<DedupRecord> {
        &self.dedup
    }

    /// Bind `session` to `recipient`, replacing any previous session, then
    /// (re)subscribe the recipient and wait for confirmation.
    pub async fn register_session(
        self: &Arc<Self>,
        recipient: &str,
        session: Arc<dyn Session>,
    ) -> Result<Readiness, SubscriptionError> {
        let session_id = session.id().to_string();
        let previous = self.sessions.write().insert(recipient.to_string(), session);
        if let Some(previous) = previous {
            info!(recipient, previous = previous.id(), session = %session_id, "session replaced");
        }

        let handler: Arc<dyn MessageHandler> = Arc::clone(self) as Arc<dyn MessageHandler>;
        let confirmation = self.subscriptions.register(recipient, handler).await?;
        let readiness = confirmation.wait(self.confirm_timeout).await;
        info!(recipient, session = %session_id, ?readiness, "session registered");
        Ok(readiness)
    }

    /// Remove the recipient's session and subscription. Returns whether a
    /// session was registered.
    pub async fn remove_session(&self, recipient: &str) -> bool {
        let removed = self.sessions.write().remove(recipient).is_some();
        self.subscriptions.unregister(recipient).await;
        if removed {
            info!(recipient, "session removed");
        }
        removed
    }

    /// Like `remove_session`, but only while `session_id` is still the
    /// recipient's registered session. A connection that has already been
    /// replaced must not tear down its successor.
    pub async fn remove_session_if(&self, recipient: &str, session_id: &str) -> bool {
        let removed = {
            let mut sessions = self.sessions.write();
            match sessions.get(recipient) {
                Some(current) if current.id() == session_id => {
                    sessions.remove(recipient);
                    true
                }
                _ => false,
            }
        };

        if removed {
            self.subscriptions.unregister(recipient).await;
            info!(recipient, session = session_id, "session removed");
        } else {
            debug!(recipient, session = session_id, "stale session, registry left untouched");
        }
        removed
    }

    pub fn session(&self, recipient: &str) -> Option<Arc<dyn Session>> {
        self.sessions.read().get(recipient).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Deliver one raw channel payload.
    pub fn dispatch(&self, raw: &[u8]) -> Result<Delivery, DispatchError> {
        match Payload::decode(raw)? {
            Payload::Notification(notification) => {
                let recipient = notification.recipient_id.as_str();
                let Some(session) = self.session(recipient) else {
                    debug!(recipient, "no session for notification");
                    return Ok(Delivery::NoSession);
                };
                let frame = serde_json::to_vec(&notification.frame())?;
                session
                    .send(&frame)
                    .map_err(|source| DispatchError::SessionWrite {
                        recipient: recipient.to_string(),
                        source,
                    })?;
                debug!(recipient, count = notification.count, "notification sent");
                Ok(Delivery::Notified)
            }
            Payload::Chat(message) => {
                let recipient = message.recipient_id.as_str();
                let message_id = message.message_id.as_str();

                let claimed_at = Instant::now();
                if !self.dedup.try_reserve(message_id, claimed_at) {
                    debug!(recipient, message_id, "skipping duplicate message");
                    return Ok(Delivery::Duplicate);
                }

                let Some(session) = self.session(recipient) else {
                    self.dedup.release(message_id, claimed_at);
                    debug!(recipient, message_id, "recipient not connected, leaving message to recovery");
                    return Ok(Delivery::NoSession);
                };

                let started = Instant::now();
                if let Err(source) = session.send(raw) {
                    self.dedup.release(message_id, claimed_at);
                    warn!(recipient, message_id, error = %source, "session write failed");
                    return Err(DispatchError::SessionWrite {
                        recipient: recipient.to_string(),
                        source,
                    });
                }

                self.dedup.record(message_id, Instant::now());
                debug!(recipient, message_id, elapsed = ?started.elapsed(), "message delivered");
                Ok(Delivery::Delivered)
            }
        }
    }

    /// Shut down every subscription. Sessions are left to the transport.
    pub async fn shutdown(&self) {
        self.subscriptions.shutdown().await;
    }
}

impl MessageHandler for Hub {
    fn handle(&self, payload: &[u8]) -> Result<(), DispatchError> {
        self.dispatch(payload).map(|_| ())
    }
}
