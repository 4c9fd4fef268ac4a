use std::path::PathBuf;
use std::time::Duration;

use doc_supervisor::config::GlobalConfig;

#[test]
fn minimal_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str("channel_root = '/var/lib/doc-supervisor/channels'\n")
        .expect("minimal config should parse");

    assert_eq!(
        config.channel_root,
        PathBuf::from("/var/lib/doc-supervisor/channels")
    );
    assert!(config.worker_program.is_none());
    assert_eq!(config.cancel_poll_interval(), Duration::from_millis(200));
}

#[test]
fn full_config_parses() {
    let toml = r"
channel_root = '/srv/channels'
worker_program = '/usr/local/bin/doc-supervisor'
cancel_poll_millis = 50
";
    let config = GlobalConfig::from_toml_str(toml).unwrap();

    assert_eq!(
        config.worker_program().unwrap(),
        PathBuf::from("/usr/local/bin/doc-supervisor")
    );
    assert_eq!(config.cancel_poll_interval(), Duration::from_millis(50));
}

#[test]
fn worker_program_defaults_to_current_exe() {
    let config = GlobalConfig::from_toml_str("channel_root = '/srv/channels'\n").unwrap();
    assert_eq!(
        config.worker_program().unwrap(),
        std::env::current_exe().unwrap()
    );
}

#[test]
fn missing_channel_root_is_rejected() {
    let err = GlobalConfig::from_toml_str("cancel_poll_millis = 10\n").unwrap_err();
    assert!(err.to_string().starts_with("config:"));
}

#[test]
fn empty_channel_root_is_rejected() {
    let err = GlobalConfig::from_toml_str("channel_root = ''\n").unwrap_err();
    assert!(err.to_string().contains("channel_root must not be empty"));
}

#[test]
fn zero_poll_interval_is_rejected() {
    let toml = "channel_root = '/srv/channels'\ncancel_poll_millis = 0\n";
    let err = GlobalConfig::from_toml_str(toml).unwrap_err();
    assert!(err.to_string().contains("cancel_poll_millis"));
}

#[test]
fn unknown_keys_are_rejected() {
    let toml = "channel_root = '/srv/channels'\norphan_timeout_seconds = 10\n";
    assert!(GlobalConfig::from_toml_str(toml).is_err());
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "channel_root = '/srv/channels'\n").unwrap();

    let config = GlobalConfig::load_from_path(&path).unwrap();
    assert_eq!(config.channel_root, PathBuf::from("/srv/channels"));
}

#[test]
fn load_from_missing_path_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = GlobalConfig::load_from_path(dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().starts_with("config:"));
}
