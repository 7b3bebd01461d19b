//! Configuration management for the shell-courier binary.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::remote::{RemoteConfig, DEFAULT_PORT};
use crate::stream::LogProgress;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote host configuration.
    pub remote: RemoteSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Remote host configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    /// Host name or address.
    pub host: Option<String>,
    /// SSH port.
    pub port: u16,
    /// Login user.
    pub user: Option<String>,
    /// Login password.
    pub password: Option<String>,
    /// Private key file.
    pub identity_file: Option<PathBuf>,
    /// Password for sudo, when it differs from the login password.
    pub sudo_password: Option<String>,
    /// Dial plus authentication deadline in seconds.
    pub connect_timeout_secs: u64,
    /// Per-upload deadline in seconds.
    pub transfer_timeout_secs: Option<u64>,
    /// Per-command deadline in seconds.
    pub command_timeout_secs: Option<u64>,
    /// Directory for upload staging files.
    pub temp_dir: String,
    /// Connection attempts before giving up.
    pub connect_attempts: u32,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            user: None,
            password: None,
            identity_file: None,
            sudo_password: None,
            connect_timeout_secs: 60,
            transfer_timeout_secs: None,
            command_timeout_secs: None,
            temp_dir: "/tmp".to_string(),
            connect_attempts: 1,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or a full filter.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`, which maps variable names to values.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(host) = non_empty("SHELL_COURIER_HOST") {
            self.remote.host = Some(host);
        }
        if let Some(port) = non_empty("SHELL_COURIER_PORT").and_then(|p| p.parse().ok()) {
            self.remote.port = port;
        }
        if let Some(user) = non_empty("SHELL_COURIER_USER") {
            self.remote.user = Some(user);
        }
        if let Some(password) = non_empty("SHELL_COURIER_PASSWORD") {
            self.remote.password = Some(password);
        }
        if let Some(identity) = non_empty("SHELL_COURIER_IDENTITY") {
            self.remote.identity_file = Some(PathBuf::from(identity));
        }
        if let Some(password) = non_empty("SHELL_COURIER_SUDO_PASSWORD") {
            self.remote.sudo_password = Some(password);
        }

        if let Some(level) = non_empty("SHELL_COURIER_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Some(level) = non_empty("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(ref host) = args.host {
            self.remote.host = Some(host.clone());
        }
        if let Some(port) = args.port {
            self.remote.port = port;
        }
        if let Some(ref user) = args.user {
            self.remote.user = Some(user.clone());
        }
        if let Some(ref identity) = args.identity {
            self.remote.identity_file = Some(identity.clone());
        }
        if let Some(attempts) = args.retries {
            self.remote.connect_attempts = attempts;
        }
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(ref path) = args.config {
            config = Config::from_file(path)?;
        }

        config.apply_env();
        config.apply_args(args);

        Ok(config)
    }

    /// Build the client configuration for the remote section.
    pub fn to_remote_config(&self) -> Result<RemoteConfig, ConfigError> {
        let remote = &self.remote;
        let host = remote
            .host
            .clone()
            .ok_or(ConfigError::Missing("remote host (-H/--host)"))?;
        let user = remote
            .user
            .clone()
            .ok_or(ConfigError::Missing("remote user (-u/--user)"))?;

        let mut config = RemoteConfig::new(user, host)
            .port(remote.port)
            .connect_timeout(Duration::from_secs(remote.connect_timeout_secs))
            .remote_temp_dir(remote.temp_dir.clone())
            .inherit_output();
        if let Some(ref identity) = remote.identity_file {
            config = config.with_key_file(identity.clone());
        }
        if let Some(ref password) = remote.password {
            config = config.with_password(password.clone());
        }
        if config.auth_methods.is_empty() {
            return Err(ConfigError::Missing(
                "authentication (-i/--identity or SHELL_COURIER_PASSWORD)",
            ));
        }
        if let Some(ref password) = remote.sudo_password {
            config = config.sudo_password(password.clone());
        }
        if let Some(secs) = remote.transfer_timeout_secs {
            config = config.transfer_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = remote.command_timeout_secs {
            config = config.command_timeout(Duration::from_secs(secs));
        }
        let label = format!("{}:{}", config.host, config.port);
        Ok(config.progress(std::sync::Arc::new(LogProgress::new(label))))
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// A required setting was not given anywhere.
    Missing(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::Missing(what) => write!(f, "missing {}", what),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.remote.host.is_none());
        assert_eq!(config.remote.port, 22);
        assert_eq!(config.remote.connect_timeout_secs, 60);
        assert_eq!(config.remote.temp_dir, "/tmp");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "remote": {
                "host": "10.0.0.5",
                "port": 2222,
                "user": "deploy",
                "identity_file": "/home/deploy/.ssh/id_ed25519",
                "transfer_timeout_secs": 300
            },
            "logging": {
                "level": "debug"
            }
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.remote.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(config.remote.port, 2222);
        assert_eq!(config.remote.transfer_timeout_secs, Some(300));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_config_partial_json() {
        let json = r#"{ "remote": { "user": "ops" } }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.remote.user.as_deref(), Some("ops"));
        assert_eq!(config.remote.port, 22); // Default
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SHELL_COURIER_HOST", "db-1"),
            ("SHELL_COURIER_PORT", "2200"),
            ("SHELL_COURIER_PASSWORD", "pw"),
            ("SHELL_COURIER_LOG_LEVEL", "trace"),
            ("RUST_LOG", "warn"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.remote.host.as_deref(), Some("db-1"));
        assert_eq!(config.remote.port, 2200);
        assert_eq!(config.remote.password.as_deref(), Some("pw"));
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn test_args_override_env() {
        let mut config = Config::default();
        config.apply_env_from(|key| (key == "SHELL_COURIER_HOST").then(|| "from-env".to_string()));

        let args = Args {
            host: Some("from-cli".to_string()),
            port: Some(2022),
            log_level: Some("debug".to_string()),
            ..Args::default()
        };
        config.apply_args(&args);

        assert_eq!(config.remote.host.as_deref(), Some("from-cli"));
        assert_eq!(config.remote.port, 2022);
        assert_eq!(config.log_filter(), "debug");
    }

    #[test]
    fn test_to_remote_config() {
        let mut config = Config::default();
        config.remote.host = Some("web-1".into());
        config.remote.user = Some("deploy".into());
        config.remote.password = Some("pw".into());
        config.remote.command_timeout_secs = Some(30);

        let remote = config.to_remote_config().unwrap();
        assert_eq!(remote.target(), "deploy@web-1:22");
        assert_eq!(remote.command_timeout, Some(Duration::from_secs(30)));
        assert_eq!(remote.effective_sudo_password(), Some("pw"));
    }

    #[test]
    fn test_to_remote_config_missing_settings() {
        let mut config = Config::default();
        assert!(matches!(
            config.to_remote_config(),
            Err(ConfigError::Missing(_))
        ));

        config.remote.host = Some("web-1".into());
        config.remote.user = Some("deploy".into());
        let err = config.to_remote_config().unwrap_err();
        assert!(err.to_string().contains("authentication"));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"remote\""));
        assert!(json.contains("\"port\""));
    }
}
