//! Broker engine
//!
//! `Broker` is the seam between the delivery core and whatever carries
//! per-recipient channels. `InMemoryBroker` is the single-instance
//! implementation: every channel is a list of unbounded senders, one per
//! confirmed subscriber.
//!
//! Concurrency notes:
//! - All operations are synchronous and safe to call from many tasks at once.
//!   The channel table lock is never held across an `.await`.
//! - Publishing is fire-and-forget. It never waits for a subscriber to consume
//!   the payload and succeeds with zero listeners; the returned count lets the
//!   producer notice that nobody is listening.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::broker::channel::{PendingSubscription, SubscriptionHandle, channel_for};
use crate::utils::error::BrokerError;

pub trait Broker: Send + Sync {
    /// Fan `payload` out to every confirmed subscriber of `recipient`'s
    /// channel and return how many received it.
    fn publish(&self, recipient: &str, payload: Bytes) -> Result<usize, BrokerError>;

    /// Request a subscription to `recipient`'s channel.
    fn subscribe(&self, recipient: &str) -> Result<PendingSubscription, BrokerError>;

    /// Detach a subscriber. Its stream ends. Unknown handles are ignored.
    fn unsubscribe(&self, handle: &SubscriptionHandle);

    /// Release the broker connection. Every stream ends and later publishes
    /// and subscribes fail with `BrokerError::Closed`.
    fn close(&self);
}

struct Listener {
    token: u64,
    tx: mpsc::UnboundedSender<Bytes>,
}

type Channels = Arc<Mutex<HashMap<String, Vec<Listener>>>>;

fn attach(channels: &Channels, channel: &str, listener: Listener) {
    channels
        .lock()
        .entry(channel.to_string())
        .or_default()
        .push(listener);
}

pub struct InMemoryBroker {
    channels: Channels,
    next_token: AtomicU64,
    closed: Arc<AtomicBool>,
    confirm_delay: Duration,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// A broker that acknowledges subscriptions immediately.
    pub fn new() -> Self {
        Self::with_confirm_delay(Duration::ZERO)
    }

    /// A broker that acknowledges each subscription only after `delay`, the
    /// way a remote broker answers a subscribe request asynchronously.
    /// Publishes made before the acknowledgement do not reach the subscriber.
    ///
    /// With a non-zero delay `subscribe` must be called inside a tokio runtime.
    pub fn with_confirm_delay(delay: Duration) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(1),
            closed: Arc::new(AtomicBool::new(false)),
            confirm_delay: delay,
        }
    }

    /// Number of confirmed, still-open subscribers on `recipient`'s channel.
    pub fn listener_count(&self, recipient: &str) -> usize {
        self.channels
            .lock()
            .get(&channel_for(recipient))
            .map(|listeners| listeners.iter().filter(|l| !l.tx.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Broker for InMemoryBroker {
    fn publish(&self, recipient: &str, payload: Bytes) -> Result<usize, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }

        let channel = channel_for(recipient);
        let mut channels = self.channels.lock();
        let delivered = match channels.get_mut(&channel) {
            Some(listeners) => {
                // Senders whose receiver is gone are pruned on the way.
                listeners.retain(|l| l.tx.send(payload.clone()).is_ok());
                let remaining = listeners.len();
                if remaining == 0 {
                    channels.remove(&channel);
                }
                remaining
            }
            None => 0,
        };
        drop(channels);

        if delivered == 0 {
            debug!(channel = %channel, "published with no listeners");
        } else {
            debug!(channel = %channel, listeners = delivered, "published");
        }
        Ok(delivered)
    }

    fn subscribe(&self, recipient: &str) -> Result<PendingSubscription, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }

        let channel = channel_for(recipient);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        let handle = SubscriptionHandle::new(channel.clone(), token);
        let listener = Listener { token, tx };

        if self.confirm_delay.is_zero() {
            attach(&self.channels, &channel, listener);
            let _ = ack_tx.send(());
        } else {
            let channels = Arc::clone(&self.channels);
            let closed = Arc::clone(&self.closed);
            let delay = self.confirm_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                // The subscriber may have given up while we were waiting.
                if closed.load(Ordering::Acquire) || ack_tx.is_closed() || listener.tx.is_closed()
                {
                    return;
                }
                attach(&channels, &channel, listener);
                let _ = ack_tx.send(());
            });
        }

        debug!(channel = %handle.channel(), token, "subscribe requested");
        Ok(PendingSubscription::new(handle, ack_rx, rx))
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut channels = self.channels.lock();
        if let Some(listeners) = channels.get_mut(handle.channel()) {
            listeners.retain(|l| l.token != handle.token());
            if listeners.is_empty() {
                channels.remove(handle.channel());
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.channels.lock().clear();
        info!("in-memory broker closed");
    }
}

impl fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("channels", &self.channels.lock().len())
            .field("closed", &self.is_closed())
            .field("confirm_delay", &self.confirm_delay)
            .finish()
    }
}
