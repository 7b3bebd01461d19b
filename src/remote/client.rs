//! Remote client: connection lifecycle and command execution.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::config::RemoteConfig;
use super::expect::{expect_loop, ExpectCallback, MergedOutput};
use super::openssh::OpenSshTransport;
use super::result::SshResult;
use super::state::ConnectionState;
use super::transport::{Connection, RemoteSession, Transport};
use crate::error::CourierError;
use crate::execution::shell_quote;
use crate::stream::{CaptureBuffer, ErrorAggregator, StreamFanout};
use crate::Result;

/// Pause between two dial attempts of [`RemoteClient::open_with_retry`].
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Connection slot guarded by the client's run lock.
pub(super) struct Inner {
    state: ConnectionState,
    connection: Option<Box<dyn Connection>>,
}

/// Client for one remote host.
///
/// At most one command, transfer or state change is in flight per client;
/// concurrent calls queue on an internal lock. A connection failure
/// poisons the client: every later call fails fast with
/// [`CourierError::Poisoned`] until a new client is built.
pub struct RemoteClient {
    config: RemoteConfig,
    transport: Arc<dyn Transport>,
    poisoned: OnceLock<String>,
    inner: Mutex<Inner>,
}

impl RemoteClient {
    /// Create a client that connects through the system `ssh` binary.
    pub fn new(config: RemoteConfig) -> Self {
        Self::with_transport(config, Arc::new(OpenSshTransport::new()))
    }

    /// Create a client over a custom transport.
    pub fn with_transport(config: RemoteConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            poisoned: OnceLock::new(),
            inner: Mutex::new(Inner {
                state: ConnectionState::Closed,
                connection: None,
            }),
        }
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Message of the failure that poisoned this client, if any.
    pub fn poisoned(&self) -> Option<&str> {
        self.poisoned.get().map(String::as_str)
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    /// Check if the client has an open connection.
    pub async fn is_open(&self) -> bool {
        self.state().await.is_open()
    }

    /// Connect and authenticate, waiting at most the connect timeout.
    ///
    /// Opening an already open client is a no-op.
    pub async fn open(&self) -> Result<()> {
        self.open_with_retry(1).await
    }

    /// Like [`open`](Self::open), trying up to `attempts` times with a one
    /// second pause between attempts.
    ///
    /// Only the failure of the last attempt poisons the client.
    pub async fn open_with_retry(&self, attempts: u32) -> Result<()> {
        self.check_poisoned()?;
        self.config.validate()?;

        let mut inner = self.inner.lock().await;
        if inner.state.is_open() {
            return Ok(());
        }

        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.dial(&mut inner).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts && !matches!(e, CourierError::UnsupportedAuth(_)) => {
                    warn!(
                        "connect attempt {}/{} to {} failed: {}",
                        attempt,
                        attempts,
                        self.config.target(),
                        e
                    );
                    tokio::time::sleep(RETRY_BACKOFF).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.poison(&e);
                    return Err(e);
                }
            }
        }
    }

    async fn dial(&self, inner: &mut Inner) -> Result<()> {
        inner.state.transition_to(ConnectionState::Dialing)?;
        let target = self.config.target();
        let timeout = self.config.connect_timeout;
        debug!("dialing {}", target);

        let connected = match tokio::time::timeout(timeout, self.transport.connect(&self.config)).await
        {
            Ok(result) => result,
            Err(_) => Err(CourierError::ConnectTimeout {
                target: target.clone(),
                timeout,
            }),
        };

        match connected {
            Ok(connection) => {
                inner.connection = Some(connection);
                inner.state.transition_to(ConnectionState::Open)?;
                info!("connected to {}", target);
                Ok(())
            }
            Err(e) => {
                inner.state.transition_to(ConnectionState::Closed)?;
                Err(e)
            }
        }
    }

    /// Close the connection. Closing a closed client succeeds.
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.state.is_open() {
            return Ok(());
        }
        let closed = match inner.connection.take() {
            Some(mut connection) => connection.close().await,
            None => Ok(()),
        };
        inner.state.transition_to(ConnectionState::Closed)?;
        info!("closed connection to {}", self.config.target());
        closed
    }

    /// Run `command` as the login user.
    pub async fn ssh(&self, command: &str) -> SshResult {
        self.run(false, command).await
    }

    /// Run `command` as root through sudo.
    pub async fn sudo_ssh(&self, command: &str) -> SshResult {
        self.run(true, command).await
    }

    /// Run `command`, optionally elevated, with the configured expect callback.
    pub async fn run(&self, sudo: bool, command: &str) -> SshResult {
        self.run_with_expect(sudo, command, self.config.expect.clone())
            .await
    }

    /// Run `command`, answering its prompts with `expect`.
    pub async fn run_with_expect(
        &self,
        sudo: bool,
        command: &str,
        expect: Arc<dyn ExpectCallback>,
    ) -> SshResult {
        let started = Instant::now();
        let stdout = CaptureBuffer::new();
        let stderr = CaptureBuffer::new();

        let execution = self.execute(sudo, command, expect, &stdout, &stderr);
        let outcome = match self.config.command_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, execution).await {
                Ok(outcome) => outcome,
                Err(_) => Err(CourierError::Timeout {
                    operation: format!("remote command `{}`", command),
                    timeout,
                }),
            },
            None => execution.await,
        };

        if let Err(e) = &outcome {
            debug!("remote command `{}` failed: {}", command, e);
        }
        SshResult {
            stdout: stdout.text(),
            stderr: stderr.text(),
            error: outcome.err(),
            duration: started.elapsed(),
        }
    }

    async fn execute(
        &self,
        sudo: bool,
        command: &str,
        expect: Arc<dyn ExpectCallback>,
        stdout: &CaptureBuffer,
        stderr: &CaptureBuffer,
    ) -> Result<()> {
        let inner = self.lock_open().await?;
        let (remote_command, password) = self.elevate(sudo, command);

        let mut session = self.new_session(&inner).await?;
        let mut streams = session.start(&remote_command).await?;
        let mut stdin = streams.take_stdin()?;
        let mut remote_stdout = streams.take_stdout()?;
        let mut remote_stderr = streams.take_stderr()?;
        debug!("started remote command: {}", remote_command);

        if let Some(password) = password {
            let fed = async {
                stdin.write_all(format!("{}\n", password).as_bytes()).await?;
                stdin.flush().await
            };
            fed.await.map_err(|source| CourierError::Copy {
                stream: "stdin",
                source,
            })?;
        }

        let mut out_sinks = StreamFanout::new().with_sink(Arc::new(stdout.clone()));
        let mut err_sinks = StreamFanout::new().with_sink(Arc::new(stderr.clone()));
        if let Some(sink) = &self.config.stdout {
            out_sinks.push(Arc::new(sink.clone()));
        }
        if let Some(sink) = &self.config.stderr {
            err_sinks.push(Arc::new(sink.clone()));
        }

        let mut tasks = ErrorAggregator::new(3);
        if expect.is_passive() {
            // Nothing will ever be typed; let the command see end-of-input
            if let Err(e) = stdin.shutdown().await {
                debug!("closing remote stdin: {}", e);
            }
            drop(stdin);
        } else {
            let (merged, updates) = MergedOutput::observed();
            let merged = Arc::new(merged);
            out_sinks.push(merged.clone());
            err_sinks.push(merged);
            tasks.spawn("expect", expect_loop(expect, updates, stdin));
        }

        tasks.spawn("stdout", async move {
            out_sinks
                .copy_from(&mut remote_stdout)
                .await
                .map(drop)
                .map_err(|source| CourierError::Copy {
                    stream: "stdout",
                    source,
                })
        });
        tasks.spawn("stderr", async move {
            err_sinks
                .copy_from(&mut remote_stderr)
                .await
                .map(drop)
                .map_err(|source| CourierError::Copy {
                    stream: "stderr",
                    source,
                })
        });

        let finished = match session.wait().await {
            Ok(Some(0)) => Ok(()),
            Ok(code) => Err(CourierError::RemoteExit {
                command: command.to_string(),
                code,
            }),
            Err(e) => Err(e),
        };
        let drained = tasks.wait().await;
        finished.and(drained)
    }

    /// Wrap `command` for sudo unless already root.
    ///
    /// Returns the command to run and the password to feed on stdin.
    fn elevate(&self, sudo: bool, command: &str) -> (String, Option<String>) {
        if !sudo || self.config.user == "root" {
            return (command.to_string(), None);
        }
        match self.config.effective_sudo_password() {
            Some(password) => (
                format!("sudo -S -p '' sh -c {}", shell_quote(command)),
                Some(password.to_string()),
            ),
            None => (format!("sudo -n sh -c {}", shell_quote(command)), None),
        }
    }

    /// Take the run lock, failing fast when poisoned or not connected.
    pub(super) async fn lock_open(&self) -> Result<MutexGuard<'_, Inner>> {
        self.check_poisoned()?;
        let inner = self.inner.lock().await;
        if !inner.state.is_open() || inner.connection.is_none() {
            return Err(CourierError::NotConnected);
        }
        Ok(inner)
    }

    /// Open a session on the held connection; a failure poisons the client.
    pub(super) async fn new_session(&self, inner: &Inner) -> Result<Box<dyn RemoteSession>> {
        let connection = inner
            .connection
            .as_ref()
            .ok_or(CourierError::NotConnected)?;
        match connection.new_session().await {
            Ok(session) => Ok(session),
            Err(e) => {
                self.poison(&e);
                Err(e)
            }
        }
    }

    fn check_poisoned(&self) -> Result<()> {
        match self.poisoned.get() {
            Some(message) => Err(CourierError::Poisoned(message.clone())),
            None => Ok(()),
        }
    }

    fn poison(&self, error: &CourierError) {
        if self.poisoned.set(error.to_string()).is_ok() {
            warn!("client for {} poisoned: {}", self.config.target(), error);
        }
    }
}
