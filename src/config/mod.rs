mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{DeliverySettings, ServerSettings, Settings, StorageSettings};

/// Prefix of environment overrides, e.g. `LIVEWIRE_SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "LIVEWIRE";

/// Loads the configuration from `config/default` (any format the `config`
/// crate understands, optional) and `LIVEWIRE_*` environment variables,
/// merged over the defaults.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Like `load_config`, reading the file at `path` instead.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(merge(partial, Settings::default()))
}

fn merge(partial: PartialSettings, default: Settings) -> Settings {
    let server = partial.server;
    let delivery = partial.delivery;
    let storage = partial.storage;

    Settings {
        server: ServerSettings {
            host: server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
        },
        delivery: DeliverySettings {
            dedup_window_ms: delivery
                .as_ref()
                .and_then(|d| d.dedup_window_ms)
                .unwrap_or(default.delivery.dedup_window_ms),
            dedup_horizon_ms: delivery
                .as_ref()
                .and_then(|d| d.dedup_horizon_ms)
                .unwrap_or(default.delivery.dedup_horizon_ms),
            exclusion_window_ms: delivery
                .as_ref()
                .and_then(|d| d.exclusion_window_ms)
                .unwrap_or(default.delivery.exclusion_window_ms),
            confirm_timeout_ms: delivery
                .as_ref()
                .and_then(|d| d.confirm_timeout_ms)
                .unwrap_or(default.delivery.confirm_timeout_ms),
            grace_delay_ms: delivery
                .as_ref()
                .and_then(|d| d.grace_delay_ms)
                .unwrap_or(default.delivery.grace_delay_ms),
            sweep_interval_ms: delivery
                .as_ref()
                .and_then(|d| d.sweep_interval_ms)
                .unwrap_or(default.delivery.sweep_interval_ms),
        },
        storage: StorageSettings {
            path: storage
                .as_ref()
                .and_then(|s| s.path.clone())
                .unwrap_or(default.storage.path),
            message_ttl_secs: storage
                .as_ref()
                .and_then(|s| s.message_ttl_secs)
                .unwrap_or(default.storage.message_ttl_secs),
        },
        log_level: partial.log_level.unwrap_or(default.log_level),
    }
}

#[cfg(test)]
mod tests;
