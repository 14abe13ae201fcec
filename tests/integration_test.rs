use anyhow::Result;
use cadence_clicker::config::{parse_duration, AppConfig, ClickKind, Point, SessionConfiguration};
use cadence_clicker::{CadenceError, DistributionKind, HumannessLevel, ProcessFinder};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_full_app_config() {
    let json = r#"
    {
        "session": {
            "location": { "x": 640, "y": 480 },
            "click_kind": "right",
            "interval": "250ms",
            "max_clicks": 100,
            "max_duration": "5m",
            "stop_on_error": true,
            "randomize": true,
            "location_jitter": 3.5,
            "target_process": "game.exe"
        },
        "randomizer": {
            "variance": 0.3,
            "distribution": "triangular",
            "humanness": "high",
            "minimum_interval": "50ms",
            "maximum_interval": "2s",
            "pattern_breakup_frequency": 0.1
        },
        "scheduler": {
            "lead_time": "200ms",
            "poll_interval": "5ms"
        },
        "pause_hotkey": "ctrl+shift+p",
        "emergency_hotkey": "ctrl+shift+s",
        "verbose": true
    }
    "#;

    let config: AppConfig = serde_json::from_str(json).unwrap();

    assert_eq!(config.session.location, Point::new(640.0, 480.0));
    assert_eq!(config.session.click_kind, ClickKind::Right);
    assert_eq!(config.session.base_interval, Duration::from_millis(250));
    assert_eq!(config.session.max_clicks, Some(100));
    assert_eq!(config.session.max_duration, Some(Duration::from_secs(300)));
    assert!(config.session.stop_on_error);
    assert!(config.session.randomize);
    assert_eq!(config.session.location_jitter, 3.5);
    assert_eq!(config.session.target_process.as_deref(), Some("game.exe"));

    assert_eq!(config.randomizer.variance, 0.3);
    assert_eq!(config.randomizer.distribution, DistributionKind::Triangular);
    assert_eq!(config.randomizer.humanness, HumannessLevel::High);
    assert_eq!(config.randomizer.minimum_interval, Duration::from_millis(50));
    assert_eq!(config.randomizer.maximum_interval, Duration::from_secs(2));

    assert_eq!(config.scheduler.lead_time, Duration::from_millis(200));
    assert_eq!(config.scheduler.poll_interval, Duration::from_millis(5));
    // Unspecified scheduler fields fall back to defaults
    assert_eq!(config.scheduler.fire_threshold, Duration::from_millis(5));
    assert_eq!(config.scheduler.drift_check_interval, Duration::from_secs(60));

    assert_eq!(config.pause_hotkey, "ctrl+shift+p");
    assert!(config.verbose);

    assert!(config.validate().is_ok());
}

#[test]
fn test_default_values() {
    let config: AppConfig = serde_json::from_str("{}").unwrap();

    assert_eq!(config.session.location, Point::new(0.0, 0.0));
    assert_eq!(config.session.click_kind, ClickKind::Left);
    assert_eq!(config.session.base_interval, Duration::from_millis(100));
    assert_eq!(config.session.max_clicks, None);
    assert_eq!(config.session.max_duration, None);
    assert!(!config.session.stop_on_error);
    assert!(!config.session.randomize);

    assert_eq!(config.randomizer.variance, 0.2);
    assert_eq!(config.randomizer.distribution, DistributionKind::Normal);
    assert_eq!(config.randomizer.humanness, HumannessLevel::Medium);
    assert_eq!(config.randomizer.minimum_interval, Duration::from_millis(10));
    assert_eq!(config.randomizer.maximum_interval, Duration::from_secs(10));

    assert_eq!(config.pause_hotkey, "ctrl+alt+p");
    assert_eq!(config.emergency_hotkey, "ctrl+alt+s");
    assert!(!config.verbose);

    assert!(config.validate().is_ok());
}

#[test]
fn test_config_from_file() -> Result<()> {
    let mut temp_file = NamedTempFile::new()?;
    writeln!(
        temp_file,
        r#"{{ "session": {{ "location": {{ "x": 10, "y": 20 }}, "interval": "1.5s" }} }}"#
    )?;

    let config = AppConfig::from_file(temp_file.path().to_str().unwrap())?;
    assert_eq!(config.session.location, Point::new(10.0, 20.0));
    assert_eq!(config.session.base_interval, Duration::from_millis(1500));

    Ok(())
}

#[test]
fn test_config_from_missing_file() {
    let result = AppConfig::from_file("/nonexistent/path/cadence.json");
    assert!(matches!(result, Err(CadenceError::ConfigLoad { .. })));
}

#[test]
fn test_config_with_invalid_duration() {
    let json = r#"{ "session": { "interval": "fast" } }"#;
    let result: std::result::Result<AppConfig, _> = serde_json::from_str(json);
    assert!(result.is_err());
}

#[test]
fn test_duration_parsing_edge_cases() {
    // Valid cases
    assert_eq!(parse_duration("0ms").unwrap(), Duration::from_millis(0));
    assert_eq!(parse_duration("1000").unwrap(), Duration::from_millis(1000));
    assert_eq!(parse_duration("5S").unwrap(), Duration::from_secs(5)); // Case insensitive
    assert_eq!(parse_duration(" 2m ").unwrap(), Duration::from_secs(120)); // Whitespace
    assert_eq!(parse_duration("0.5ms").unwrap(), Duration::from_micros(500));
    assert_eq!(parse_duration("750µs").unwrap(), Duration::from_micros(750));

    // Invalid cases
    assert!(parse_duration("").is_err());
    assert!(parse_duration("abc").is_err());
    assert!(parse_duration("1000x").is_err());
    assert!(parse_duration("-1000ms").is_err());
    assert!(parse_duration("1.2.3s").is_err());
}

#[test]
fn test_config_validation_errors() {
    let mut config = AppConfig::default();
    config.session.base_interval = Duration::ZERO;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.randomizer.variance = 1.5;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.randomizer.minimum_interval = Duration::from_secs(20);
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.scheduler.poll_interval = Duration::from_millis(25);
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.pause_hotkey = "  ".to_string();
    assert!(config.validate().is_err());
}

// Config save/load round-trip test

#[test]
fn test_config_save_load_roundtrip() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let config_path = temp_dir.path().join("cadence.json");

    let mut original = AppConfig::default();
    original.session = SessionConfiguration::new(Point::new(300.0, 200.0), Duration::from_micros(2500))
        .with_click_kind(ClickKind::Double)
        .with_max_clicks(42)
        .with_max_duration(Duration::from_secs(90))
        .with_randomization(true);
    original.randomizer.distribution = DistributionKind::Exponential;
    original.pause_hotkey = "ctrl+shift+f1".to_string();
    original.verbose = true;

    // Save
    original.save_to_file(config_path.to_str().unwrap())?;

    // Load
    let loaded = AppConfig::from_file(config_path.to_str().unwrap())?;

    // Verify
    assert_eq!(loaded, original);
    assert_eq!(loaded.session.base_interval, Duration::from_micros(2500));

    Ok(())
}

#[test]
fn test_sub_microsecond_interval_survives_save() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let config_path = temp_dir.path().join("fast.json");

    let mut original = AppConfig::default();
    original.session.base_interval = Duration::from_nanos(500);
    assert!(original.validate().is_ok());

    original.save_to_file(config_path.to_str().unwrap())?;
    let loaded = AppConfig::from_file(config_path.to_str().unwrap())?;

    assert_eq!(loaded.session.base_interval, Duration::from_nanos(500));
    assert!(loaded.validate().is_ok());

    Ok(())
}

// ProcessFinder tests

#[test]
fn test_process_finder_nonexistent_process() {
    let mut finder = ProcessFinder::new();
    let result = finder.resolve("nonexistent_process_xyz_123456");
    assert!(result.is_ok());
    assert!(result.unwrap().is_none());
}

// Error type tests

#[test]
fn test_error_types() {
    let err = CadenceError::invalid_duration("10q", "unknown unit 'q'");
    assert!(err.to_string().contains("10q"));
    assert!(err.is_configuration_error());

    let err = CadenceError::config_load("cadence.json", "not found");
    assert!(err.to_string().contains("cadence.json"));
    assert!(!err.is_configuration_error());

    let err = CadenceError::budget_exceeded(
        "emergency stop",
        Duration::from_millis(50),
        Duration::from_millis(70),
    );
    assert!(err.to_string().contains("emergency stop"));
}
