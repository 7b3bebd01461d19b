//! CLI integration tests.
//!
//! These tests verify the CLI argument parsing and configuration loading.

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

use shell_courier::cli::{parse_args_from, ServiceAction, Subcommand};
use shell_courier::config::{Config, ConfigError};
use shell_courier::AuthMethod;

fn args(args: &[&str]) -> Vec<OsString> {
    std::iter::once("shell-courier")
        .chain(args.iter().copied())
        .map(OsString::from)
        .collect()
}

// ============================================================================
// CLI Argument Tests
// ============================================================================

#[test]
fn test_cli_full_options() {
    let result = parse_args_from(args(&[
        "-H",
        "10.0.0.5",
        "-p",
        "2222",
        "-u",
        "deploy",
        "-l",
        "debug",
        "service",
        "start",
        "nginx",
    ]))
    .unwrap();

    assert_eq!(result.host.as_deref(), Some("10.0.0.5"));
    assert_eq!(result.port, Some(2222));
    assert_eq!(result.user.as_deref(), Some("deploy"));
    assert_eq!(result.log_level, Some("debug".to_string()));
    assert_eq!(
        result.command,
        Some(Subcommand::Service {
            action: ServiceAction::Start,
            name: "nginx".to_string()
        })
    );
}

#[test]
fn test_cli_options_after_subcommand() {
    let result = parse_args_from(args(&["deploy-service", "app", "app.service", "-H", "web-1"]))
        .unwrap();

    assert_eq!(result.host.as_deref(), Some("web-1"));
    assert_eq!(
        result.command,
        Some(Subcommand::DeployService {
            name: "app".to_string(),
            unit_file: PathBuf::from("app.service")
        })
    );
}

#[test]
fn test_cli_config_file() {
    let result = parse_args_from(args(&["-c", "/etc/shell-courier.json"])).unwrap();

    assert_eq!(
        result.config.unwrap().to_str().unwrap(),
        "/etc/shell-courier.json"
    );
}

#[test]
fn test_cli_invalid_port() {
    let result = parse_args_from(args(&["-p", "not-a-number"]));
    assert!(result.is_err());
}

#[test]
fn test_cli_unknown_option() {
    let result = parse_args_from(args(&["--no-such-flag"]));
    assert!(result.is_err());
}

// ============================================================================
// Configuration Tests
// ============================================================================

#[test]
fn test_config_from_json_file() {
    let json = r#"{
        "remote": {
            "host": "db-1",
            "port": 2200,
            "user": "ops",
            "identity_file": "/home/ops/.ssh/id_ed25519",
            "sudo_password": "s3cret",
            "connect_attempts": 3
        },
        "logging": {
            "level": "warn"
        }
    }"#;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.remote.host.as_deref(), Some("db-1"));
    assert_eq!(config.remote.port, 2200);
    assert_eq!(config.remote.connect_attempts, 3);
    assert_eq!(config.logging.level, "warn");

    let remote = config.to_remote_config().unwrap();
    assert_eq!(remote.target(), "ops@db-1:2200");
    assert!(matches!(remote.auth_methods[0], AuthMethod::KeyFile(_)));
    assert_eq!(remote.effective_sudo_password(), Some("s3cret"));
}

#[test]
fn test_config_priority_cli_over_file() {
    let json = r#"{ "remote": { "host": "from-file", "port": 2200, "connect_attempts": 2 } }"#;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let cli = parse_args_from(args(&["-c", &path, "-H", "from-cli", "-r", "5"])).unwrap();
    let mut config = Config::from_file(file.path()).unwrap();
    config.apply_args(&cli);

    assert_eq!(config.remote.host.as_deref(), Some("from-cli"));
    assert_eq!(config.remote.port, 2200);
    assert_eq!(config.remote.connect_attempts, 5);
}

#[test]
fn test_config_invalid_json() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"{ not json").unwrap();

    assert!(matches!(
        Config::from_file(file.path()),
        Err(ConfigError::Json(_))
    ));
}

#[test]
fn test_config_missing_file() {
    let cli = parse_args_from(args(&["-c", "/nonexistent/shell-courier.json"])).unwrap();
    assert!(matches!(Config::load(&cli), Err(ConfigError::Io(_))));
}

#[test]
fn test_config_roundtrip() {
    let mut config = Config::default();
    config.remote.host = Some("web-1".to_string());
    config.remote.command_timeout_secs = Some(45);

    let json = serde_json::to_string(&config).unwrap();
    let parsed: Config = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed.remote.host.as_deref(), Some("web-1"));
    assert_eq!(parsed.remote.command_timeout_secs, Some(45));
    assert_eq!(parsed.remote.port, config.remote.port);
}
