//! Transport driving the system `ssh` binary.
//!
//! `connect` starts a ControlMaster that authenticates once and stays in
//! the background; every session is a short-lived `ssh` client
//! multiplexed over its control socket.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::config::{AuthMethod, RemoteConfig};
use super::transport::{Connection, RemoteSession, SessionStreams, Transport};
use crate::error::CourierError;
use crate::Result;

/// Environment variable the askpass helper reads the password from.
const ASKPASS_ENV: &str = "SHELL_COURIER_ASKPASS";

/// Give up waiting for the master after this long when closing.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

const ASKPASS_SCRIPT: &str = "#!/bin/sh\nprintf '%s\\n' \"$SHELL_COURIER_ASKPASS\"\n";

/// How the master authenticates, derived from the configured methods.
#[derive(Debug, Default)]
struct Credentials {
    identities: Vec<PathBuf>,
    password: Option<String>,
    preferred: Vec<&'static str>,
}

impl Credentials {
    fn prefer(&mut self, method: &'static str) {
        if !self.preferred.contains(&method) {
            self.preferred.push(method);
        }
    }
}

/// [`Transport`] over OpenSSH connection multiplexing.
#[derive(Debug, Clone)]
pub struct OpenSshTransport {
    program: PathBuf,
}

impl Default for OpenSshTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenSshTransport {
    /// Use `ssh` from `PATH`.
    pub fn new() -> Self {
        Self::with_program("ssh")
    }

    /// Use a specific ssh executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn credentials(config: &RemoteConfig, dir: &Path) -> Result<Credentials> {
        let mut credentials = Credentials::default();
        for (index, method) in config.auth_methods.iter().enumerate() {
            match method {
                AuthMethod::Password(password) => {
                    credentials.password.get_or_insert_with(|| password.clone());
                    credentials.prefer("password");
                    credentials.prefer("keyboard-interactive");
                }
                AuthMethod::PrivateKey(key) => {
                    let path = dir.join(format!("id_{}", index));
                    let mut key = key.clone();
                    if !key.ends_with('\n') {
                        key.push('\n');
                    }
                    write_private_file(&path, key.as_bytes(), 0o600).await?;
                    credentials.identities.push(path);
                    credentials.prefer("publickey");
                }
                AuthMethod::KeyFile(path) => {
                    credentials.identities.push(path.clone());
                    credentials.prefer("publickey");
                }
                AuthMethod::Interactive(_) => {
                    return Err(CourierError::UnsupportedAuth(
                        "keyboard-interactive callbacks need an in-process ssh client".into(),
                    ))
                }
            }
        }
        Ok(credentials)
    }
}

/// Arguments that start the background master.
fn master_args(config: &RemoteConfig, control_path: &Path, credentials: &Credentials) -> Vec<String> {
    let connect_secs = config.connect_timeout.as_secs().max(1);
    let mut args: Vec<String> = vec![
        "-M".into(),
        "-f".into(),
        "-N".into(),
        "-o".into(),
        "ControlPersist=yes".into(),
        "-o".into(),
        format!("ControlPath={}", control_path.display()),
        "-o".into(),
        "StrictHostKeyChecking=accept-new".into(),
        "-o".into(),
        format!("ConnectTimeout={}", connect_secs),
    ];
    if !credentials.preferred.is_empty() {
        args.push("-o".into());
        args.push(format!(
            "PreferredAuthentications={}",
            credentials.preferred.join(",")
        ));
    }
    if credentials.password.is_some() {
        args.push("-o".into());
        args.push("NumberOfPasswordPrompts=1".into());
    } else {
        args.push("-o".into());
        args.push("BatchMode=yes".into());
    }
    if !credentials.identities.is_empty() {
        args.push("-o".into());
        args.push("IdentitiesOnly=yes".into());
        for identity in &credentials.identities {
            args.push("-i".into());
            args.push(identity.display().to_string());
        }
    }
    args.extend(destination_args(config));
    args
}

/// Port, user and host, in that order.
fn destination_args(config: &RemoteConfig) -> Vec<String> {
    vec![
        "-p".into(),
        config.port.to_string(),
        "-l".into(),
        config.user.clone(),
        config.host.clone(),
    ]
}

/// Arguments that run a command over an existing master.
fn session_args(config: &RemoteConfig, control_path: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-T".into(),
        "-o".into(),
        "BatchMode=yes".into(),
        "-o".into(),
        "ControlMaster=no".into(),
        "-S".into(),
        control_path.display().to_string(),
    ];
    args.extend(destination_args(config));
    args
}

async fn write_private_file(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)
        .await?;
    file.write_all(contents).await?;
    file.flush().await?;
    Ok(())
}

#[async_trait]
impl Transport for OpenSshTransport {
    async fn connect(&self, config: &RemoteConfig) -> Result<Box<dyn Connection>> {
        let dir = tempfile::Builder::new()
            .prefix("shell-courier-")
            .tempdir()?;
        let control_path = dir.path().join("control");
        let credentials = Self::credentials(config, dir.path()).await?;

        let log_path = dir.path().join("master.log");
        let log = std::fs::File::create(&log_path)?;

        let mut command = Command::new(&self.program);
        command
            .args(master_args(config, &control_path, &credentials))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            // A pipe would stay open in the forked master
            .stderr(Stdio::from(log))
            .kill_on_drop(true);
        if let Some(password) = &credentials.password {
            let askpass = dir.path().join("askpass");
            write_private_file(&askpass, ASKPASS_SCRIPT.as_bytes(), 0o700).await?;
            command
                .env("SSH_ASKPASS", &askpass)
                .env("SSH_ASKPASS_REQUIRE", "force")
                .env(ASKPASS_ENV, password);
        }

        debug!("starting ssh master for {}", config.target());
        let status = command.status().await.map_err(|source| CourierError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        if !status.success() {
            let log = tokio::fs::read_to_string(&log_path).await.unwrap_or_default();
            let message = match log.trim() {
                "" => format!("ssh exited with {}", status),
                text => text.to_string(),
            };
            return Err(CourierError::Connect {
                target: config.target(),
                message,
            });
        }

        info!("ssh master running for {}", config.target());
        Ok(Box::new(OpenSshConnection {
            program: self.program.clone(),
            session_args: session_args(config, &control_path),
            control_path,
            destination: destination_args(config),
            dir: Some(dir),
        }))
    }
}

/// A running ControlMaster.
struct OpenSshConnection {
    program: PathBuf,
    session_args: Vec<String>,
    control_path: PathBuf,
    destination: Vec<String>,
    dir: Option<TempDir>,
}

impl OpenSshConnection {
    fn exit_args(&self) -> Vec<String> {
        let mut args = vec![
            "-S".to_string(),
            self.control_path.display().to_string(),
            "-O".to_string(),
            "exit".to_string(),
        ];
        args.extend(self.destination.iter().cloned());
        args
    }
}

#[async_trait]
impl Connection for OpenSshConnection {
    async fn new_session(&self) -> Result<Box<dyn RemoteSession>> {
        if self.dir.is_none() {
            return Err(CourierError::NotConnected);
        }
        Ok(Box::new(OpenSshSession {
            program: self.program.clone(),
            args: self.session_args.clone(),
            child: None,
        }))
    }

    async fn close(&mut self) -> Result<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        let exit = Command::new(&self.program)
            .args(self.exit_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        match tokio::time::timeout(CLOSE_TIMEOUT, exit).await {
            Ok(Ok(status)) if status.success() => {}
            Ok(Ok(status)) => warn!("ssh master exit request returned {}", status),
            Ok(Err(e)) => warn!("failed to stop ssh master: {}", e),
            Err(_) => warn!("ssh master did not stop within {:?}", CLOSE_TIMEOUT),
        }
        if let Err(e) = dir.close() {
            warn!("failed to remove ssh control directory: {}", e);
        }
        Ok(())
    }
}

impl Drop for OpenSshConnection {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let mut exit = std::process::Command::new(&self.program);
        exit.args(self.exit_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Inside a runtime the exit request runs in the background and the
        // control directory lives until it is done.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            match Command::from(exit).spawn() {
                Ok(mut child) => {
                    handle.spawn(async move {
                        if let Err(e) = child.wait().await {
                            warn!("failed to stop ssh master: {}", e);
                        }
                        drop(dir);
                    });
                }
                Err(e) => warn!("failed to stop ssh master: {}", e),
            }
            return;
        }

        if let Err(e) = exit.status() {
            warn!("failed to stop ssh master: {}", e);
        }
    }
}

/// One `ssh` client process multiplexed over the master.
struct OpenSshSession {
    program: PathBuf,
    args: Vec<String>,
    child: Option<Child>,
}

#[async_trait]
impl RemoteSession for OpenSshSession {
    async fn start(&mut self, command: &str) -> Result<SessionStreams> {
        if self.child.is_some() {
            return Err(CourierError::Session("session already started".into()));
        }
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CourierError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let streams = SessionStreams {
            stdin: child.stdin.take().map(|p| Box::new(p) as _),
            stdout: child.stdout.take().map(|p| Box::new(p) as _),
            stderr: child.stderr.take().map(|p| Box::new(p) as _),
        };
        self.child = Some(child);
        Ok(streams)
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| CourierError::Session("session not started".into()))?;
        let status = child.wait().await?;
        Ok(status.code())
    }
}
