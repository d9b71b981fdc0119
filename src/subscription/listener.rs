//! Listener task bound to one subscription.
//!
//! The task first waits for the broker's handshake acknowledgement. Only then
//! does it fire the confirmation signal and start consuming, so a caller that
//! waited for confirmation knows later publishes will be seen.
//!
//! A malformed payload or a failing handler never ends the loop. It ends on
//! the per-subscription stop signal, the process-wide shutdown signal, or the
//! broker closing the stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::broker::PendingSubscription;
use crate::broker::message::Payload;
use crate::utils::error::DispatchError;
use crate::utils::shutdown::shutdown_requested;

/// Receives every well-formed payload of a subscription.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, payload: &[u8]) -> Result<(), DispatchError>;
}

impl<F> MessageHandler for F
where
    F: Fn(&[u8]) -> Result<(), DispatchError> + Send + Sync,
{
    fn handle(&self, payload: &[u8]) -> Result<(), DispatchError> {
        self(payload)
    }
}

pub(crate) struct Listener {
    pub(crate) recipient: String,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) confirmed: Arc<AtomicBool>,
}

impl Listener {
    pub(crate) async fn run(
        self,
        pending: PendingSubscription,
        on_confirmed: oneshot::Sender<()>,
        mut stop: oneshot::Receiver<()>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let recipient = self.recipient.as_str();
        let started = Instant::now();
        debug!(recipient, channel = %pending.handle().channel(), "waiting for subscription confirmation");

        let mut stream = tokio::select! {
            biased;
            _ = &mut stop => {
                debug!(recipient, "listener stopped before confirmation");
                return;
            }
            _ = shutdown_requested(&mut shutdown) => {
                debug!(recipient, "listener shut down before confirmation");
                return;
            }
            confirmed = pending.confirmed() => match confirmed {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(recipient, error = %e, elapsed = ?started.elapsed(), "subscription was not confirmed");
                    return;
                }
            },
        };

        self.confirmed.store(true, Ordering::Release);
        info!(recipient, elapsed = ?started.elapsed(), "subscription confirmed");
        let _ = on_confirmed.send(());

        loop {
            tokio::select! {
                biased;
                _ = &mut stop => {
                    debug!(recipient, "listener stopped");
                    break;
                }
                _ = shutdown_requested(&mut shutdown) => {
                    debug!(recipient, "listener shut down");
                    break;
                }
                next = stream.next() => match next {
                    Some(payload) => self.deliver(&payload),
                    None => {
                        debug!(recipient, "broker closed the message stream");
                        break;
                    }
                },
            }
        }
    }

    fn deliver(&self, payload: &[u8]) {
        let recipient = self.recipient.as_str();
        let decoded = match Payload::decode(payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(recipient, error = %e, "skipping malformed payload");
                return;
            }
        };

        let started = Instant::now();
        match self.handler.handle(payload) {
            Ok(()) => debug!(recipient, message = decoded.label(), elapsed = ?started.elapsed(), "payload handled"),
            Err(e) => warn!(recipient, message = decoded.label(), error = %e, "handler failed"),
        }
    }
}
