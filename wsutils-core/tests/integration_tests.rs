//! Integration tests for wsutils-core infrastructure

use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use wsutils_core::{
    config_error, init_logging, not_found_error, validation_error, ConfigProvider, ErrorContext,
    seconds_or, LockSettings, LogFormat, LoggingConfig, SiteConfig, WsConfig, WsError, KEY_REGISTRATION_DIR,
    KEY_REGISTRATION_KEY,
};

#[test]
fn test_error_handling() {
    let error = validation_error!("email too short", "email", "test_component");

    match &error {
        WsError::Validation {
            message,
            field,
            context,
        } => {
            assert_eq!(message, "email too short");
            assert_eq!(field.as_deref(), Some("email"));
            assert_eq!(context.component, "test_component");
            assert!(!context.error_id.is_empty());
        }
        _ => panic!("Expected Validation error"),
    }
    assert_eq!(error.status_code(), 400);

    // Should not panic
    error.log();

    let timeout = WsError::LockTimeout {
        path: "/tmp/x.lock".to_string(),
        timeout_ms: 2000,
        context: ErrorContext::new("test"),
    };
    assert!(timeout.is_recoverable());
    assert_eq!(timeout.status_code(), 503);

    let config_error = config_error!("Invalid config", "test");
    assert!(!config_error.is_recoverable());

    let missing = not_found_error!("site 'x'", "test");
    assert_eq!(missing.status_code(), 404);
}

#[test]
fn test_logging_initialization() {
    let config = LoggingConfig {
        level: "debug".to_string(),
        format: LogFormat::Compact,
        include_location: false,
        include_thread: false,
        log_to_file: false,
        log_file_path: None,
        enable_span_timing: false,
        filter_directives: vec!["wsutils_core=debug".to_string()],
    };

    // The global subscriber can only be installed once per process
    let _ = init_logging(&config);
}

#[test]
fn test_logging_requires_file_path() {
    let config = LoggingConfig {
        log_to_file: true,
        log_file_path: None,
        ..LoggingConfig::default()
    };
    assert!(init_logging(&config).is_err());
}

#[test]
fn test_config_validation() {
    let mut config = WsConfig::default();
    assert!(config.validate().is_ok());

    config
        .sites
        .get_mut("default")
        .unwrap()
        .token
        .algorithm = "RS256".to_string();
    match config.validate().unwrap_err() {
        WsError::Config { message, .. } => assert!(message.contains("HMAC")),
        other => panic!("Expected Config error, got {other:?}"),
    }

    let mut config = WsConfig::default();
    config.default_site = "missing".to_string();
    assert!(matches!(config.validate(), Err(WsError::NotFound { .. })));
}

#[test]
fn test_lock_timings_must_be_finite() {
    let mut config = WsConfig::default();
    let site = config.sites.get_mut("default").unwrap();
    site.locks.token_store.timeout_seconds = f64::INFINITY;
    match config.validate().unwrap_err() {
        WsError::Config { message, .. } => assert!(message.contains("locks.token_store")),
        other => panic!("Expected Config error, got {other:?}"),
    }

    let mut config = WsConfig::default();
    let site = config.sites.get_mut("default").unwrap();
    site.locks.history.retry_seconds = f64::NAN;
    assert!(config.validate().is_err());

    let mut config = WsConfig::default();
    let site = config.sites.get_mut("default").unwrap();
    site.locks.history_unlocked_delay_seconds = f64::INFINITY;
    assert!(config.validate().is_err());
}

#[test]
fn test_lock_durations_never_panic() {
    let settings = LockSettings::new(f64::INFINITY, f64::NAN);
    let defaults = LockSettings::default();
    assert_eq!(settings.timeout(), defaults.timeout());
    assert_eq!(settings.retry_interval(), defaults.retry_interval());

    assert_eq!(LockSettings::new(-4.0, 0.5).timeout(), Duration::ZERO);
    assert_eq!(seconds_or(1e300, 1.0), Duration::MAX);
    assert_eq!(seconds_or(f64::NEG_INFINITY, 1.5), Duration::from_millis(1500));
}

#[test]
fn test_config_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = WsConfig::default();
    let mut site = SiteConfig::rooted_at(dir.path());
    site.registration_key = "s3cret".to_string();
    site.token.prefix = Some("VALWS".to_string());
    config.sites.insert("rcsb".to_string(), site);
    config.save_to_file(&path).unwrap();

    let loaded = WsConfig::from_file(&path).unwrap();
    let site = loaded.site(Some("rcsb")).unwrap();
    assert_eq!(site.registration_key, "s3cret");
    assert_eq!(site.token.prefix.as_deref(), Some("VALWS"));
    assert_eq!(site.token.expire_days, 30);

    let layered = WsConfig::load(Some(&path)).unwrap();
    assert_eq!(
        layered.site(Some("rcsb")).unwrap().registration_dir,
        dir.path().join("registration")
    );
}

#[test]
fn test_site_config_provider() {
    let mut site = SiteConfig::rooted_at("/srv/ws");
    site.extra
        .insert("SITE_ADMIN_EMAIL".to_string(), "ops@example.org".to_string());

    assert_eq!(
        PathBuf::from(site.get(KEY_REGISTRATION_DIR, "")),
        PathBuf::from("/srv/ws/registration")
    );
    assert_eq!(site.get(KEY_REGISTRATION_KEY, "x"), "secretvalue");
    assert!(site.uses_default_key());
    assert_eq!(site.get("SITE_ADMIN_EMAIL", ""), "ops@example.org");
    assert_eq!(site.get("SITE_UNKNOWN", "fallback"), "fallback");
}
