//! In-memory transport for exercising [`RemoteClient`](super::RemoteClient)
//! without a network.
//!
//! Every session spawns a scripted handler that talks to the client over
//! `tokio::io::duplex` pipes, and the transport keeps counters that tests
//! assert on.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use super::config::RemoteConfig;
use super::transport::{Connection, RemoteSession, SessionStreams, Transport};
use crate::error::CourierError;
use crate::Result;

/// Pipe capacity of every in-memory stream.
const PIPE_CAPACITY: usize = 64 * 1024;

type Handler = Arc<dyn Fn(MockProcess) -> BoxFuture<'static, i32> + Send + Sync>;

/// The remote end of one mock command.
pub struct MockProcess {
    /// Command line the client started.
    pub command: String,
    /// Bytes the client writes to the command's stdin.
    pub stdin: DuplexStream,
    /// Command stdout, read by the client.
    pub stdout: DuplexStream,
    /// Command stderr, read by the client.
    pub stderr: DuplexStream,
}

/// A file received through [`MockProcess::receive_scp`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScpUpload {
    pub mode: u32,
    pub name: String,
    pub contents: Vec<u8>,
}

impl MockProcess {
    /// Write to stdout, ignoring a client that stopped reading.
    pub async fn write_stdout(&mut self, bytes: &[u8]) {
        let _ = self.stdout.write_all(bytes).await;
    }

    /// Write to stderr, ignoring a client that stopped reading.
    pub async fn write_stderr(&mut self, bytes: &[u8]) {
        let _ = self.stderr.write_all(bytes).await;
    }

    /// Read one stdin line without its newline; empty at end of input.
    pub async fn read_stdin_line(&mut self) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        while let Ok(1) = self.stdin.read(&mut byte).await {
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }
        String::from_utf8_lossy(&line).into_owned()
    }

    /// Read stdin until the client closes it.
    pub async fn read_stdin_to_end(&mut self) -> Vec<u8> {
        let mut bytes = Vec::new();
        let _ = self.stdin.read_to_end(&mut bytes).await;
        bytes
    }

    /// Play the receiving side of the copy protocol for a single file.
    pub async fn receive_scp(&mut self) -> std::io::Result<ScpUpload> {
        self.stdout.write_all(&[0]).await?;

        let header = self.read_stdin_line().await;
        let upload = parse_header(&header)?;
        self.stdout.write_all(&[0]).await?;

        let size = upload.1;
        let mut contents = vec![0u8; size];
        self.stdin.read_exact(&mut contents).await?;
        let mut trailer = [0u8; 1];
        self.stdin.read_exact(&mut trailer).await?;
        if trailer[0] != 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "missing end-of-file marker",
            ));
        }
        self.stdout.write_all(&[0]).await?;

        // The sender closes stdin once done
        let _ = self.read_stdin_to_end().await;
        Ok(ScpUpload {
            mode: upload.0,
            name: upload.2,
            contents,
        })
    }

    /// Signal readiness, then refuse the file header with `message`.
    pub async fn reject_scp(&mut self, message: &str) -> String {
        let _ = self.stdout.write_all(&[0]).await;
        let header = self.read_stdin_line().await;
        let _ = self
            .stdout
            .write_all(format!("\x01scp: {}\n", message).as_bytes())
            .await;
        header
    }
}

fn parse_header(header: &str) -> std::io::Result<(u32, usize, String)> {
    let invalid = || {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("bad copy header: {:?}", header),
        )
    };
    let rest = header.strip_prefix('C').ok_or_else(invalid)?;
    let mut parts = rest.splitn(3, ' ');
    let mode = parts
        .next()
        .and_then(|m| u32::from_str_radix(m, 8).ok())
        .ok_or_else(invalid)?;
    let size = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(invalid)?;
    let name = parts.next().ok_or_else(invalid)?.to_string();
    Ok((mode, size, name))
}

struct Shared {
    handler: Handler,
    commands: Mutex<Vec<String>>,
    closes: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

/// Scripted in-memory [`Transport`].
pub struct MockTransport {
    shared: Arc<Shared>,
    failures_left: AtomicUsize,
    connects: AtomicUsize,
}

impl MockTransport {
    /// Run `handler` as the remote side of every command; it returns the exit code.
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(MockProcess) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |process| -> BoxFuture<'static, i32> { Box::pin(handler(process)) });
        Self {
            shared: Arc::new(Shared {
                handler,
                commands: Mutex::new(Vec::new()),
                closes: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }),
            failures_left: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
        }
    }

    /// Answer each command with `(exit code, stdout, stderr)` from `respond`.
    pub fn responding<F>(respond: F) -> Self
    where
        F: Fn(&str) -> (i32, String, String) + Send + Sync + 'static,
    {
        let respond = Arc::new(respond);
        Self::new(move |mut process| {
            let respond = respond.clone();
            async move {
                let (code, stdout, stderr) = respond(&process.command);
                process.write_stdout(stdout.as_bytes()).await;
                process.write_stderr(stderr.as_bytes()).await;
                code
            }
        })
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_connects(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    /// Number of connection attempts so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of closed connections.
    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Every command started, in order.
    pub fn commands(&self) -> Vec<String> {
        self.shared
            .commands
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Highest number of sessions that were running at the same time.
    pub fn max_concurrent_sessions(&self) -> usize {
        self.shared.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, config: &RemoteConfig) -> Result<Box<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(CourierError::Connect {
                target: config.target(),
                message: "connection refused".into(),
            });
        }
        Ok(Box::new(MockConnection {
            shared: self.shared.clone(),
        }))
    }
}

struct MockConnection {
    shared: Arc<Shared>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn new_session(&self) -> Result<Box<dyn RemoteSession>> {
        Ok(Box::new(MockSession {
            shared: self.shared.clone(),
            task: None,
            running: false,
        }))
    }

    async fn close(&mut self) -> Result<()> {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockSession {
    shared: Arc<Shared>,
    task: Option<JoinHandle<i32>>,
    running: bool,
}

impl MockSession {
    fn finish(&mut self) {
        if self.running {
            self.running = false;
            self.shared.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn start(&mut self, command: &str) -> Result<SessionStreams> {
        if self.task.is_some() {
            return Err(CourierError::Session("session already started".into()));
        }
        if let Ok(mut commands) = self.shared.commands.lock() {
            commands.push(command.to_string());
        }

        let (client_stdin, remote_stdin) = tokio::io::duplex(PIPE_CAPACITY);
        let (remote_stdout, client_stdout) = tokio::io::duplex(PIPE_CAPACITY);
        let (remote_stderr, client_stderr) = tokio::io::duplex(PIPE_CAPACITY);

        let active = self.shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_active.fetch_max(active, Ordering::SeqCst);
        self.running = true;

        let process = MockProcess {
            command: command.to_string(),
            stdin: remote_stdin,
            stdout: remote_stdout,
            stderr: remote_stderr,
        };
        self.task = Some(tokio::spawn((self.shared.handler)(process)));

        Ok(SessionStreams {
            stdin: Some(Box::new(client_stdin)),
            stdout: Some(Box::new(client_stdout)),
            stderr: Some(Box::new(client_stderr)),
        })
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        let task = self
            .task
            .take()
            .ok_or_else(|| CourierError::Session("session not started".into()))?;
        let outcome = task.await;
        self.finish();
        outcome
            .map(Some)
            .map_err(|e| CourierError::Session(format!("mock command failed: {}", e)))
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.finish();
    }
}
