//! Remote client configuration.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::expect::{ExpectCallback, NoExpect};
use crate::error::{BoxError, CourierError};
use crate::stream::{NoProgress, ProgressObserver, SharedSink};
use crate::Result;

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// Default deadline for dial plus authentication.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default staging directory for uploads.
pub const DEFAULT_REMOTE_TEMP_DIR: &str = "/tmp";

/// Answers keyboard-interactive authentication challenges.
pub trait InteractiveAuth: Send + Sync {
    /// Return one answer per prompt.
    fn respond(
        &self,
        name: &str,
        instruction: &str,
        prompts: &[String],
    ) -> std::result::Result<Vec<String>, BoxError>;
}

/// One way of authenticating, tried in the order configured.
#[derive(Clone)]
pub enum AuthMethod {
    /// Password authentication.
    Password(String),
    /// Private key given as PEM/OpenSSH text.
    PrivateKey(String),
    /// Private key read from a file.
    KeyFile(PathBuf),
    /// Keyboard-interactive challenge handler.
    Interactive(Arc<dyn InteractiveAuth>),
}

impl AuthMethod {
    /// Short name used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Password(_) => "password",
            Self::PrivateKey(_) => "private-key",
            Self::KeyFile(_) => "key-file",
            Self::Interactive(_) => "keyboard-interactive",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
            other => write!(f, "{}(<redacted>)", other.kind()),
        }
    }
}

/// Everything a [`RemoteClient`](super::RemoteClient) needs to connect and run.
///
/// Built up front and handed to the client by value; the client never
/// mutates it, so authentication methods are fixed once it exists.
#[derive(Clone)]
pub struct RemoteConfig {
    /// Login user.
    pub user: String,
    /// Host name or address.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Authentication methods in preference order.
    pub auth_methods: Vec<AuthMethod>,
    /// Deadline for dial plus authentication.
    pub connect_timeout: Duration,
    /// Deadline for a single file transfer.
    pub transfer_timeout: Option<Duration>,
    /// Deadline for a single remote command.
    pub command_timeout: Option<Duration>,
    /// Directory holding upload staging files.
    pub remote_temp_dir: String,
    /// Password fed to `sudo -S`; defaults to the first password method.
    pub sudo_password: Option<String>,
    /// Extra sink for remote stdout.
    pub stdout: Option<SharedSink>,
    /// Extra sink for remote stderr.
    pub stderr: Option<SharedSink>,
    /// Interactive responder for every command.
    pub expect: Arc<dyn ExpectCallback>,
    /// Upload progress observer.
    pub progress: Arc<dyn ProgressObserver>,
}

impl RemoteConfig {
    /// Create a configuration for `user@host` with no authentication yet.
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            port: DEFAULT_PORT,
            auth_methods: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            transfer_timeout: None,
            command_timeout: None,
            remote_temp_dir: DEFAULT_REMOTE_TEMP_DIR.to_string(),
            sudo_password: None,
            stdout: None,
            stderr: None,
            expect: Arc::new(NoExpect),
            progress: Arc::new(NoProgress),
        }
    }

    /// Add password authentication.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.auth_methods.push(AuthMethod::Password(password.into()));
        self
    }

    /// Add private key authentication from key text.
    pub fn with_private_key(mut self, key: impl Into<String>) -> Self {
        self.auth_methods.push(AuthMethod::PrivateKey(key.into()));
        self
    }

    /// Add private key authentication from a key file.
    pub fn with_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.auth_methods.push(AuthMethod::KeyFile(path.into()));
        self
    }

    /// Add keyboard-interactive authentication.
    pub fn with_interactive(mut self, handler: Arc<dyn InteractiveAuth>) -> Self {
        self.auth_methods.push(AuthMethod::Interactive(handler));
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-transfer timeout.
    pub fn transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = Some(timeout);
        self
    }

    /// Set the per-command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Set the upload staging directory.
    pub fn remote_temp_dir(mut self, dir: impl Into<String>) -> Self {
        self.remote_temp_dir = dir.into();
        self
    }

    /// Set the sudo password explicitly.
    pub fn sudo_password(mut self, password: impl Into<String>) -> Self {
        self.sudo_password = Some(password.into());
        self
    }

    /// Mirror remote stdout into `sink`.
    pub fn stdout(mut self, sink: SharedSink) -> Self {
        self.stdout = Some(sink);
        self
    }

    /// Mirror remote stderr into `sink`.
    pub fn stderr(mut self, sink: SharedSink) -> Self {
        self.stderr = Some(sink);
        self
    }

    /// Mirror remote output to this process's stdout and stderr.
    pub fn inherit_output(self) -> Self {
        self.stdout(SharedSink::stdout())
            .stderr(SharedSink::stderr())
    }

    /// Answer prompts of every command with `callback`.
    pub fn expect(mut self, callback: Arc<dyn ExpectCallback>) -> Self {
        self.expect = callback;
        self
    }

    /// Report upload progress to `observer`.
    pub fn progress(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.progress = observer;
        self
    }

    /// `user@host:port`, used in logs and errors.
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }

    /// Password for `sudo -S`, if any is known.
    pub fn effective_sudo_password(&self) -> Option<&str> {
        self.sudo_password.as_deref().or_else(|| {
            self.auth_methods.iter().find_map(|method| match method {
                AuthMethod::Password(password) => Some(password.as_str()),
                _ => None,
            })
        })
    }

    /// Reject configurations that can never connect.
    pub fn validate(&self) -> Result<()> {
        if self.user.is_empty() {
            return Err(CourierError::Config("user is empty".into()));
        }
        if self.host.is_empty() {
            return Err(CourierError::Config("host is empty".into()));
        }
        if self.auth_methods.is_empty() {
            return Err(CourierError::Config(
                "no authentication method configured".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("user", &self.user)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("auth_methods", &self.auth_methods)
            .field("connect_timeout", &self.connect_timeout)
            .field("transfer_timeout", &self.transfer_timeout)
            .field("command_timeout", &self.command_timeout)
            .field("remote_temp_dir", &self.remote_temp_dir)
            .field("sudo_password", &self.sudo_password.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RemoteConfig::new("deploy", "10.0.0.5");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.connect_timeout, Duration::from_secs(60));
        assert_eq!(config.remote_temp_dir, "/tmp");
        assert!(config.transfer_timeout.is_none());
        assert!(config.auth_methods.is_empty());
        assert_eq!(config.target(), "deploy@10.0.0.5:22");
    }

    #[test]
    fn test_auth_methods_keep_order() {
        let config = RemoteConfig::new("u", "h")
            .with_key_file("/home/u/.ssh/id_ed25519")
            .with_password("pw");
        let kinds: Vec<_> = config.auth_methods.iter().map(AuthMethod::kind).collect();
        assert_eq!(kinds, vec!["key-file", "password"]);
    }

    #[test]
    fn test_validate() {
        assert!(RemoteConfig::new("", "h").with_password("p").validate().is_err());
        assert!(RemoteConfig::new("u", "").with_password("p").validate().is_err());
        assert!(RemoteConfig::new("u", "h").validate().is_err());
        assert!(RemoteConfig::new("u", "h").with_password("p").validate().is_ok());
    }

    #[test]
    fn test_effective_sudo_password() {
        let config = RemoteConfig::new("u", "h").with_private_key("KEY");
        assert_eq!(config.effective_sudo_password(), None);

        let config = config.with_password("login");
        assert_eq!(config.effective_sudo_password(), Some("login"));

        let config = config.sudo_password("root-pw");
        assert_eq!(config.effective_sudo_password(), Some("root-pw"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = RemoteConfig::new("u", "h")
            .with_password("hunter2")
            .sudo_password("hunter3");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("hunter3"));
        assert!(debug.contains("redacted"));
    }
}
