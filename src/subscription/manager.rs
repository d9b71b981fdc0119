//! Subscription manager
//!
//! Keeps exactly one live broker subscription per recipient. Registering a
//! recipient that already has one retires the old subscription first: it is
//! detached from the broker, its listener is told to stop, and the manager
//! waits (bounded by the grace delay) for that listener to exit before the new
//! subscription is opened. All of this happens under the exclusive table lock,
//! so concurrent registrations for one recipient serialize and a stale
//! listener can never feed the hub alongside its replacement.
//!
//! Concurrency and usage notes:
//! - The table lock is a `tokio::sync::RwLock` because the retire wait is an
//!   `.await` made while holding it.
//! - A single `watch` channel carries the process-wide shutdown flag to every
//!   listener (and to any other background task that asks for it).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::broker::{Broker, SubscriptionHandle};
use crate::subscription::listener::{Listener, MessageHandler};
use crate::utils::error::SubscriptionError;

/// Outcome of waiting for a subscription to be confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The broker acknowledged; publishes from now on are delivered.
    Confirmed,
    /// No acknowledgement within the wait limit. It will most likely still
    /// arrive; an early message may be momentarily unroutable meanwhile.
    TimedOut,
    /// The listener exited before confirming (replaced, unregistered, shut
    /// down, or the handshake failed).
    Abandoned,
}

/// Single-use signal fired by the listener once the broker acknowledges.
#[derive(Debug)]
pub struct Confirmation {
    recipient: String,
    rx: oneshot::Receiver<()>,
}

impl Confirmation {
    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// Wait at most `limit` for the acknowledgement.
    pub async fn wait(self, limit: Duration) -> Readiness {
        match timeout(limit, self.rx).await {
            Ok(Ok(())) => Readiness::Confirmed,
            Ok(Err(_)) => Readiness::Abandoned,
            Err(_) => {
                warn!(recipient = %self.recipient, ?limit, "subscription confirmation timed out, proceeding anyway");
                Readiness::TimedOut
            }
        }
    }
}

struct ActiveSubscription {
    handle: SubscriptionHandle,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    confirmed: Arc<AtomicBool>,
}

impl ActiveSubscription {
    /// Detach from the broker and wait for the listener to exit. A listener
    /// that overruns the grace delay is aborted and then awaited, so it has
    /// terminated by the time this returns.
    async fn retire(mut self, broker: &dyn Broker, grace: Duration, recipient: &str) {
        broker.unsubscribe(&self.handle);
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        if timeout(grace, &mut self.task).await.is_err() {
            warn!(recipient, ?grace, "listener did not exit within grace delay, aborting");
            self.task.abort();
            let _ = (&mut self.task).await;
        }
        debug!(recipient, channel = %self.handle.channel(), "subscription retired");
    }
}

pub struct SubscriptionManager {
    broker: Arc<dyn Broker>,
    subscriptions: RwLock<HashMap<String, ActiveSubscription>>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
    grace: Duration,
}

impl SubscriptionManager {
    /// `grace` bounds how long a replaced listener is given to exit.
    pub fn new(broker: Arc<dyn Broker>, grace: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            broker,
            subscriptions: RwLock::new(HashMap::new()),
            shutdown,
            closed: AtomicBool::new(false),
            grace,
        }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// A receiver of the process-wide shutdown flag.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Open the recipient's subscription, replacing any existing one, and
    /// start its listener. The returned `Confirmation` fires once the broker
    /// has acknowledged.
    pub async fn register(
        &self,
        recipient: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Confirmation, SubscriptionError> {
        let mut subscriptions = self.subscriptions.write().await;
        if self.is_shut_down() {
            return Err(SubscriptionError::ShutDown);
        }

        if let Some(previous) = subscriptions.remove(recipient) {
            info!(recipient, "recipient already subscribed, retiring previous subscription");
            previous
                .retire(self.broker.as_ref(), self.grace, recipient)
                .await;
        }

        let pending = self.broker.subscribe(recipient)?;
        let handle = pending.handle().clone();
        let (confirmed_tx, confirmed_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let confirmed = Arc::new(AtomicBool::new(false));

        let listener = Listener {
            recipient: recipient.to_string(),
            handler,
            confirmed: Arc::clone(&confirmed),
        };
        let task = tokio::spawn(listener.run(
            pending,
            confirmed_tx,
            stop_rx,
            self.shutdown.subscribe(),
        ));

        info!(recipient, channel = %handle.channel(), "subscribing, waiting for confirmation");
        subscriptions.insert(
            recipient.to_string(),
            ActiveSubscription {
                handle,
                stop: Some(stop_tx),
                task,
                confirmed,
            },
        );

        Ok(Confirmation {
            recipient: recipient.to_string(),
            rx: confirmed_rx,
        })
    }

    /// Close and remove the recipient's subscription. Unknown recipients are
    /// a no-op.
    pub async fn unregister(&self, recipient: &str) {
        let mut subscriptions = self.subscriptions.write().await;
        match subscriptions.remove(recipient) {
            Some(subscription) => {
                subscription
                    .retire(self.broker.as_ref(), self.grace, recipient)
                    .await;
                info!(recipient, "unsubscribed");
            }
            None => debug!(recipient, "unregister for unknown recipient ignored"),
        }
    }

    /// Stop every listener, close every subscription and release the broker.
    /// Calling it again does nothing.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.send_replace(true);

        let mut subscriptions = self.subscriptions.write().await;
        let count = subscriptions.len();
        for (recipient, subscription) in subscriptions.drain() {
            subscription
                .retire(self.broker.as_ref(), self.grace, &recipient)
                .await;
        }
        drop(subscriptions);

        self.broker.close();
        info!(subscriptions = count, "subscription manager shut down");
    }

    pub async fn is_registered(&self, recipient: &str) -> bool {
        self.subscriptions.read().await.contains_key(recipient)
    }

    /// Whether the recipient's current subscription has been acknowledged.
    pub async fn is_confirmed(&self, recipient: &str) -> bool {
        self.subscriptions
            .read()
            .await
            .get(recipient)
            .is_some_and(|s| s.confirmed.load(Ordering::Acquire))
    }

    pub async fn active_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }
}
