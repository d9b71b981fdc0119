//! Recovery reconciler
//!
//! Loads a recipient's undelivered records and publishes them again through
//! the broker, where the recipient's subscription and the hub's dedup take
//! over. Records touched within the exclusion window are left alone: they are
//! most likely still travelling the normal delivery path, and a republish
//! could land after the dedup window has already closed.
//!
//! The pass is best-effort. A record that fails to republish stays
//! undelivered and is retried by the next pass; the report says exactly what
//! happened to each record.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::persistence::UndeliveredSource;
use crate::utils::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Republished { listeners: usize },
    /// Updated within the exclusion window.
    SkippedRecent,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub recipient: String,
    pub entries: Vec<(String, Outcome)>,
}

impl ReconcileReport {
    fn ids_where(&self, pred: impl Fn(&Outcome) -> bool) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, outcome)| pred(outcome))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Ids that were handed to the broker again.
    pub fn republished(&self) -> Vec<&str> {
        self.ids_where(|o| matches!(o, Outcome::Republished { .. }))
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.ids_where(|o| matches!(o, Outcome::SkippedRecent))
    }

    pub fn failed(&self) -> Vec<&str> {
        self.ids_where(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct Reconciler {
    store: Arc<dyn UndeliveredSource>,
    broker: Arc<dyn Broker>,
    exclusion: TimeDelta,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn UndeliveredSource>,
        broker: Arc<dyn Broker>,
        exclusion: Duration,
    ) -> Self {
        Self {
            store,
            broker,
            exclusion: TimeDelta::from_std(exclusion).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn fetch_and_republish_undelivered(
        &self,
        recipient: &str,
    ) -> Result<ReconcileReport, StoreError> {
        self.fetch_and_republish_at(recipient, Utc::now())
    }

    /// Run one pass as if the current time were `now`.
    pub fn fetch_and_republish_at(
        &self,
        recipient: &str,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport, StoreError> {
        let candidates = self.store.fetch_undelivered(recipient)?;
        let threshold = now
            .checked_sub_signed(self.exclusion)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut entries = Vec::with_capacity(candidates.len());

        for record in candidates {
            // Records without an update stamp are republished rather than risk
            // leaving them stranded.
            if record.updated_at.is_some_and(|at| at > threshold) {
                debug!(recipient, message_id = %record.message_id, "skipping recently updated message");
                entries.push((record.message_id, Outcome::SkippedRecent));
                continue;
            }

            let outcome = match serde_json::to_vec(&record.to_chat_message()) {
                Err(e) => Outcome::Failed(format!("encode: {e}")),
                Ok(payload) => match self.broker.publish(recipient, Bytes::from(payload)) {
                    Ok(listeners) => Outcome::Republished { listeners },
                    Err(e) => Outcome::Failed(e.to_string()),
                },
            };
            if let Outcome::Failed(reason) = &outcome {
                warn!(recipient, message_id = %record.message_id, reason = %reason, "failed to republish undelivered message");
            }
            entries.push((record.message_id, outcome));
        }

        let report = ReconcileReport {
            recipient: recipient.to_string(),
            entries,
        };
        if !report.is_empty() {
            info!(
                recipient,
                republished = report.republished().len(),
                skipped = report.skipped().len(),
                failed = report.failed().len(),
                "reconciliation pass finished"
            );
        }
        Ok(report)
    }
}
