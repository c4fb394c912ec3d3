use std::sync::Mutex;
use std::time::Duration;

use conveyer::config::Config;
use conveyer::log::LogHub;
use tracing::Level;

/// Tests in this file share the process environment.
static ENV: Mutex<()> = Mutex::new(());

const VARS: [&str; 4] = [
    "CONVEYER_MAX_CONCURRENT",
    "CONVEYER_DRAIN_TIMEOUT",
    "CONVEYER_LOG_THRESHOLD",
    "LOG_LEVEL",
];

fn clear() {
    for var in VARS {
        unsafe { std::env::remove_var(var) };
    }
}

#[test]
fn config_defaults_without_env() {
    let _env = ENV.lock().unwrap_or_else(|e| e.into_inner());
    clear();

    let config = Config::from_env().unwrap();
    assert!(config.max_concurrent >= 10);
    assert_eq!(config.drain_timeout, None);
    assert_eq!(config.log_threshold, Level::DEBUG);
    assert_eq!(config.log_level, "info");
}

#[test]
fn config_reads_env() {
    let _env = ENV.lock().unwrap_or_else(|e| e.into_inner());
    clear();
    unsafe {
        std::env::set_var("CONVEYER_MAX_CONCURRENT", "3");
        std::env::set_var("CONVEYER_DRAIN_TIMEOUT", "30");
        std::env::set_var("CONVEYER_LOG_THRESHOLD", "warn");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.max_concurrent, 3);
    assert_eq!(config.drain_timeout, Some(Duration::from_secs(30)));
    assert_eq!(config.log_threshold, Level::WARN);

    let conveyer = config.conveyer_config(LogHub::new());
    assert_eq!(conveyer.pool.max_concurrent, 3);
    assert_eq!(conveyer.log_threshold, Level::WARN);

    clear();
}

#[test]
fn config_rejects_bad_values() {
    let _env = ENV.lock().unwrap_or_else(|e| e.into_inner());

    for (var, value) in [
        ("CONVEYER_MAX_CONCURRENT", "0"),
        ("CONVEYER_MAX_CONCURRENT", "many"),
        ("CONVEYER_DRAIN_TIMEOUT", "soon"),
        ("CONVEYER_LOG_THRESHOLD", "loud"),
    ] {
        clear();
        unsafe { std::env::set_var(var, value) };
        assert!(Config::from_env().is_err(), "{var}={value} should be rejected");
    }
    clear();
}
