//! Recently-delivered message ids.
//!
//! An entry maps a message id to the instant it was delivered. A repeat of
//! the id within `window` is a duplicate. Entries are purely advisory; the
//! durable store holds the authoritative delivery status.
//!
//! Expiry is lazy on read, and a sweep removes entries older than `horizon`
//! (never shorter than the window) to bound memory. The sweep collects expired
//! keys under the read lock and only takes the write lock to remove that
//! snapshot, so dispatch is never stalled behind a full scan.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::utils::shutdown::shutdown_requested;

#[derive(Debug)]
pub struct DedupRecord {
    window: Duration,
    horizon: Duration,
    entries: RwLock<HashMap<String, Instant>>,
}

impl DedupRecord {
    pub fn new(window: Duration, horizon: Duration) -> Self {
        Self {
            window,
            horizon: horizon.max(window),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn within_window(&self, at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(at) < self.window
    }

    /// Whether `message_id` was delivered less than a window before `now`.
    pub fn is_recent(&self, message_id: &str, now: Instant) -> bool {
        self.entries
            .read()
            .get(message_id)
            .is_some_and(|at| self.within_window(*at, now))
    }

    /// Atomically check and claim `message_id` for delivery at `now`.
    /// Returns `false` when it is a duplicate. A claim that does not end in a
    /// delivery must be handed back with `release`.
    pub fn try_reserve(&self, message_id: &str, now: Instant) -> bool {
        let mut entries = self.entries.write();
        if entries
            .get(message_id)
            .is_some_and(|at| self.within_window(*at, now))
        {
            return false;
        }
        entries.insert(message_id.to_string(), now);
        true
    }

    /// Drop a claim made at `reserved_at`, unless it was since overwritten.
    pub fn release(&self, message_id: &str, reserved_at: Instant) {
        let mut entries = self.entries.write();
        if entries.get(message_id) == Some(&reserved_at) {
            entries.remove(message_id);
        }
    }

    /// Record a delivery of `message_id` at `at`.
    pub fn record(&self, message_id: &str, at: Instant) {
        self.entries.write().insert(message_id.to_string(), at);
    }

    /// Remove entries older than the horizon. Returns how many went.
    pub fn prune(&self, now: Instant) -> usize {
        let expired: Vec<(String, Instant)> = self
            .entries
            .read()
            .iter()
            .filter(|(_, at)| now.saturating_duration_since(**at) >= self.horizon)
            .map(|(id, at)| (id.clone(), *at))
            .collect();
        if expired.is_empty() {
            return 0;
        }

        let mut entries = self.entries.write();
        let mut removed = 0;
        for (id, at) in expired {
            // Skip ids re-delivered since the snapshot.
            if entries.get(&id) == Some(&at) {
                entries.remove(&id);
                removed += 1;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Periodically prune until the shutdown flag is raised.
    pub async fn start_sweep_loop(
        record: Arc<DedupRecord>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {
                    let removed = record.prune(Instant::now());
                    if removed > 0 {
                        debug!(removed, remaining = record.len(), "pruned dedup entries");
                    }
                }
            }
        }
        info!("dedup sweep loop stopped");
    }
}
