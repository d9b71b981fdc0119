use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the server, the delivery core and the message store.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub delivery: DeliverySettings,
    pub storage: StorageSettings,
    pub log_level: String,
}

/// Configuration settings for the server.
///
/// Defines the host and port the server will bind to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Timing of the delivery core. All values are milliseconds.
///
/// None of these are semantic constants; they trade duplicate suppression
/// against memory and latency and can be tuned per deployment.
#[derive(Debug, Deserialize, Clone)]
pub struct DeliverySettings {
    /// A repeat of a message id within this span is suppressed.
    pub dedup_window_ms: u64,
    /// Dedup entries older than this are swept.
    pub dedup_horizon_ms: u64,
    /// Undelivered records updated within this span are not republished.
    pub exclusion_window_ms: u64,
    /// How long session registration waits for subscription confirmation.
    pub confirm_timeout_ms: u64,
    /// How long a replaced listener is given to exit.
    pub grace_delay_ms: u64,
    pub sweep_interval_ms: u64,
}

impl DeliverySettings {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn dedup_horizon(&self) -> Duration {
        Duration::from_millis(self.dedup_horizon_ms)
    }

    pub fn exclusion_window(&self) -> Duration {
        Duration::from_millis(self.exclusion_window_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }

    /// Never zero, since a zero period is not a valid interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

/// Configuration settings for the durable message store.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    pub path: String,
    /// Retention of delivered records; 0 keeps them forever.
    pub message_ttl_secs: u64,
}

impl StorageSettings {
    pub fn ttl_seconds(&self) -> Option<i64> {
        match self.message_ttl_secs {
            0 => None,
            secs => Some(i64::try_from(secs).unwrap_or(i64::MAX)),
        }
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub delivery: Option<PartialDeliverySettings>,
    pub storage: Option<PartialStorageSettings>,
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialDeliverySettings {
    pub dedup_window_ms: Option<u64>,
    pub dedup_horizon_ms: Option<u64>,
    pub exclusion_window_ms: Option<u64>,
    pub confirm_timeout_ms: Option<u64>,
    pub grace_delay_ms: Option<u64>,
    pub sweep_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialStorageSettings {
    pub path: Option<String>,
    pub message_ttl_secs: Option<u64>,
}

/// Provides default values for `Settings`.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            delivery: DeliverySettings {
                dedup_window_ms: 5_000,
                dedup_horizon_ms: 10_000,
                exclusion_window_ms: 2_000,
                confirm_timeout_ms: 5_000,
                grace_delay_ms: 50,
                sweep_interval_ms: 10_000,
            },
            storage: StorageSettings {
                path: "livewire_db".to_string(),
                message_ttl_secs: 3600,
            },
            log_level: "info".to_string(),
        }
    }
}
