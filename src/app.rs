//! Wiring of the delivery core from `Settings`.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::broker::{Broker, InMemoryBroker};
use crate::config::Settings;
use crate::hub::{DedupRecord, Hub};
use crate::persistence::{SledStore, UndeliveredSource};
use crate::producer::Producer;
use crate::recovery::Reconciler;
use crate::subscription::SubscriptionManager;
use crate::utils::error::StoreError;

pub struct App {
    settings: Settings,
    broker: Arc<dyn Broker>,
    store: Arc<SledStore>,
    hub: Arc<Hub>,
    reconciler: Reconciler,
    producer: Producer,
}

impl App {
    /// Open the store at `settings.storage.path` and build every component
    /// around one in-memory broker.
    pub fn build(settings: Settings) -> Result<Self, StoreError> {
        let store = SledStore::open(&settings.storage.path, settings.storage.ttl_seconds())?;
        Ok(Self::with_parts(settings, Arc::new(InMemoryBroker::new()), Arc::new(store)))
    }

    pub fn with_parts(settings: Settings, broker: Arc<dyn Broker>, store: Arc<SledStore>) -> Self {
        let delivery = &settings.delivery;
        let subscriptions = Arc::new(SubscriptionManager::new(
            Arc::clone(&broker),
            delivery.grace_delay(),
        ));
        let dedup = Arc::new(DedupRecord::new(
            delivery.dedup_window(),
            delivery.dedup_horizon(),
        ));
        let hub = Arc::new(Hub::new(subscriptions, dedup, delivery.confirm_timeout()));
        let source: Arc<dyn UndeliveredSource> = store.clone();
        let reconciler = Reconciler::new(source, Arc::clone(&broker), delivery.exclusion_window());
        let producer = Producer::new(Arc::clone(&store), Arc::clone(&broker));

        Self {
            settings,
            broker,
            store,
            hub,
            reconciler,
            producer,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn store(&self) -> &Arc<SledStore> {
        &self.store
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    /// Start the dedup sweeper. It stops when the hub shuts down.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let record = Arc::clone(self.hub.dedup());
        let interval = self.settings.delivery.sweep_interval();
        let shutdown = self.hub.subscriptions().shutdown_signal();
        tokio::spawn(DedupRecord::start_sweep_loop(record, interval, shutdown))
    }

    pub async fn shutdown(&self) {
        self.hub.shutdown().await;
        if let Err(e) = self.store.flush() {
            warn!(error = %e, "failed to flush message store");
        }
        info!("delivery core shut down");
    }
}
