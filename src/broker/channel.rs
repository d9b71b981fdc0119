//! Per-recipient channels and the handles a subscriber holds on them.
//!
//! Subscribing is a two-stage affair. `Broker::subscribe` hands back a
//! `PendingSubscription`; awaiting `confirmed()` on it resolves once the broker
//! has acknowledged the subscription and yields the live `MessageStream`.
//! Anything published after the acknowledgement reaches that stream.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::utils::error::BrokerError;

const CHANNEL_PREFIX: &str = "user:";
const CHANNEL_SUFFIX: &str = ":messages";

/// Channel name for a recipient, e.g. `user:u1:messages`.
pub fn channel_for(recipient: &str) -> String {
    format!("{CHANNEL_PREFIX}{recipient}{CHANNEL_SUFFIX}")
}

/// Identifies one subscriber on one channel. Passed back to
/// `Broker::unsubscribe` to detach it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    channel: String,
    token: u64,
}

impl SubscriptionHandle {
    pub fn new(channel: String, token: u64) -> Self {
        Self { channel, token }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn token(&self) -> u64 {
        self.token
    }
}

/// A subscription request the broker has accepted but not yet acknowledged.
#[derive(Debug)]
pub struct PendingSubscription {
    handle: SubscriptionHandle,
    ack: oneshot::Receiver<()>,
    stream: mpsc::UnboundedReceiver<Bytes>,
}

impl PendingSubscription {
    pub fn new(
        handle: SubscriptionHandle,
        ack: oneshot::Receiver<()>,
        stream: mpsc::UnboundedReceiver<Bytes>,
    ) -> Self {
        Self {
            handle,
            ack,
            stream,
        }
    }

    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    /// Wait for the broker's acknowledgement. Fails if the broker dropped the
    /// request (closed, or unsubscribed before acknowledging).
    pub async fn confirmed(self) -> Result<MessageStream, BrokerError> {
        match self.ack.await {
            Ok(()) => Ok(MessageStream {
                handle: self.handle,
                rx: self.stream,
            }),
            Err(_) => Err(BrokerError::HandshakeAborted(self.handle.channel)),
        }
    }
}

/// The live side of a confirmed subscription.
#[derive(Debug)]
pub struct MessageStream {
    handle: SubscriptionHandle,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl MessageStream {
    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    /// Next payload in broker order; `None` once the broker detached us.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}
