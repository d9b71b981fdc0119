use super::settings::Settings;
use super::{load_config, load_config_from};
use serial_test::serial;
use std::env;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.delivery.dedup_window(), Duration::from_secs(5));
    assert_eq!(settings.delivery.dedup_horizon(), Duration::from_secs(10));
    assert_eq!(settings.delivery.exclusion_window(), Duration::from_secs(2));
    assert_eq!(settings.delivery.confirm_timeout(), Duration::from_secs(5));
    assert_eq!(settings.delivery.grace_delay(), Duration::from_millis(50));
    assert_eq!(settings.storage.ttl_seconds(), Some(3600));
    assert_eq!(settings.log_level, "info");
}

#[test]
fn test_zero_ttl_and_sweep_interval() {
    let mut settings = Settings::default();
    settings.storage.message_ttl_secs = 0;
    settings.delivery.sweep_interval_ms = 0;
    assert_eq!(settings.storage.ttl_seconds(), None);
    assert_eq!(settings.delivery.sweep_interval(), Duration::from_millis(1));
}

#[test]
#[serial]
fn test_load_config_from_file_overrides_defaults() {
    // load_config reads config/default relative to the working directory.
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        log_level = "debug"

        [server]
        host = "0.0.0.0"
        port = 9000

        [delivery]
        dedup_window_ms = 250
        exclusion_window_ms = 1500

        [storage]
        path = "/var/lib/livewire"
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let cfg = load_config();
    env::set_current_dir(orig).expect("restore cwd");
    let cfg = cfg.expect("load_config failed");

    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.delivery.dedup_window_ms, 250);
    assert_eq!(cfg.delivery.exclusion_window_ms, 1500);
    // Unset keys fall back to defaults.
    assert_eq!(cfg.delivery.dedup_horizon_ms, 10_000);
    assert_eq!(cfg.storage.path, "/var/lib/livewire");
    assert_eq!(cfg.storage.message_ttl_secs, 3600);
    assert_eq!(cfg.log_level, "debug");
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("livewire.toml");
    fs::write(&path, "[server]\nport = 9000\n").expect("write config file");
    let path = path.to_str().unwrap().to_string();

    temp_env::with_vars(
        [
            ("LIVEWIRE_SERVER__PORT", Some("9100")),
            ("LIVEWIRE_DELIVERY__GRACE_DELAY_MS", Some("75")),
        ],
        || {
            let cfg = load_config_from(&path).expect("load_config_from failed");
            assert_eq!(cfg.server.port, 9100);
            assert_eq!(cfg.delivery.grace_delay_ms, 75);
            assert_eq!(cfg.server.host, "127.0.0.1");
        },
    );
}

#[test]
#[serial]
fn test_missing_file_yields_defaults() {
    let cfg = load_config_from("/nonexistent/livewire").expect("load_config_from failed");
    assert_eq!(cfg.server.port, 8080);
    assert_eq!(cfg.storage.path, "livewire_db");
}
