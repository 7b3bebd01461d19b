//! File upload over the copy protocol (`scp -t` receiver).

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use super::client::RemoteClient;
use crate::error::CourierError;
use crate::execution::shell_quote;
use crate::stream::{ErrorAggregator, ProgressObserver, ProgressWriter, StreamFanout};
use crate::Result;

/// Longest diagnostic read after a refusing acknowledgment.
const MAX_ACK_MESSAGE: usize = 512;

/// Mode announced for uploaded files.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Step of one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Dial,
    SessionStart,
    SendHeader,
    AwaitAck,
    StreamBytes,
    SendTrailer,
    AwaitFinalAck,
    Wait,
    Done,
    Error,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dial => "dial",
            Self::SessionStart => "session-start",
            Self::SendHeader => "send-header",
            Self::AwaitAck => "await-ack",
            Self::StreamBytes => "stream-bytes",
            Self::SendTrailer => "send-trailer",
            Self::AwaitFinalAck => "await-final-ack",
            Self::Wait => "wait",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Tracks the step an upload reached, for logs and errors.
#[derive(Debug)]
struct Transfer {
    remote_path: String,
    state: TransferState,
}

impl Transfer {
    fn new(remote_path: &str) -> Self {
        Self {
            remote_path: remote_path.to_string(),
            state: TransferState::Dial,
        }
    }

    fn enter(&mut self, state: TransferState) {
        debug!("upload {}: {} -> {}", self.remote_path, self.state, state);
        self.state = state;
    }
}

/// Split a remote path into its directory and file name.
fn split_remote_path(remote_path: &str) -> Result<(String, String)> {
    let (dir, name) = match remote_path.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((dir, name)) => (dir, name),
        None => (".", remote_path),
    };
    if name.is_empty() || name.contains('\n') {
        return Err(CourierError::Config(format!(
            "invalid remote file path `{}`",
            remote_path
        )));
    }
    Ok((dir.to_string(), name.to_string()))
}

/// Read one acknowledgment byte: zero accepts, anything else refuses.
async fn read_ack<R>(reader: &mut R) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let code = reader.read_u8().await.map_err(|e| {
        CourierError::Protocol(format!("receiver closed without acknowledging: {}", e))
    })?;
    if code == 0 {
        return Ok(());
    }

    let mut message = Vec::new();
    let mut byte = [0u8; 1];
    while message.len() < MAX_ACK_MESSAGE {
        match reader.read(&mut byte).await {
            Ok(1) if byte[0] != b'\n' => message.push(byte[0]),
            _ => break,
        }
    }
    let message = String::from_utf8_lossy(&message).trim().to_string();
    Err(CourierError::Protocol(if message.is_empty() {
        format!("receiver refused with code {}", code)
    } else {
        message
    }))
}

/// What the header line announces.
#[derive(Debug, Clone)]
struct FileHeader {
    name: String,
    mode: u32,
    size: u64,
}

impl fmt::Display for FileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "C{:04o} {} {}", self.mode & 0o7777, self.size, self.name)
    }
}

/// Write and flush one protocol message.
async fn send_bytes<W>(to_remote: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    to_remote.write_all(bytes).await?;
    to_remote.flush().await
}

/// A closed pipe mid-handshake is a failed transfer, never end-of-stream.
fn step_failed(transfer: &Transfer, err: std::io::Error) -> CourierError {
    CourierError::Protocol(format!("{} failed: {}", transfer.state, err))
}

/// Drive the sending side of the protocol for one file.
///
/// Returns the number of body bytes streamed.
async fn send_file<W, R, S>(
    transfer: &mut Transfer,
    to_remote: &mut W,
    from_remote: &mut R,
    source: S,
    header: &FileHeader,
    observer: Arc<dyn ProgressObserver>,
) -> Result<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
    R: AsyncRead + Unpin + ?Sized,
    S: AsyncRead + Unpin,
{
    let size = header.size;
    // The receiver announces it is ready before reading the header
    read_ack(from_remote).await?;

    transfer.enter(TransferState::SendHeader);
    send_bytes(to_remote, header.to_string().as_bytes())
        .await
        .map_err(|e| step_failed(transfer, e))?;

    transfer.enter(TransferState::AwaitAck);
    read_ack(from_remote).await?;

    transfer.enter(TransferState::StreamBytes);
    let mut writer = ProgressWriter::new(&mut *to_remote, size, observer);
    let copied = tokio::io::copy(&mut source.take(size), &mut writer).await;
    writer.finish();
    let sent = copied.map_err(|e| {
        CourierError::Protocol(format!(
            "{} failed after {} of {} bytes: {}",
            transfer.state,
            writer.written(),
            size,
            e
        ))
    })?;
    if sent != size {
        return Err(CourierError::TransferMismatch {
            expected: size,
            sent,
        });
    }

    transfer.enter(TransferState::SendTrailer);
    send_bytes(to_remote, &[0])
        .await
        .map_err(|e| step_failed(transfer, e))?;

    transfer.enter(TransferState::AwaitFinalAck);
    read_ack(from_remote).await?;
    Ok(sent)
}

impl RemoteClient {
    /// Upload `local_path` to `remote_path` with mode 0644.
    pub async fn copy_file(&self, local_path: impl AsRef<Path>, remote_path: &str) -> Result<()> {
        self.copy_file_with_mode(local_path, remote_path, DEFAULT_FILE_MODE)
            .await
    }

    /// Upload `local_path` to `remote_path`, announcing `mode`.
    pub async fn copy_file_with_mode(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        mode: u32,
    ) -> Result<()> {
        let local_path = local_path.as_ref();
        let upload = self.upload(local_path, remote_path, mode);
        match self.config().transfer_timeout {
            Some(timeout) => tokio::time::timeout(timeout, upload)
                .await
                .map_err(|_| CourierError::Timeout {
                    operation: format!("upload of {} to {}", local_path.display(), remote_path),
                    timeout,
                })?,
            None => upload.await,
        }
    }

    async fn upload(&self, local_path: &Path, remote_path: &str, mode: u32) -> Result<()> {
        let mut transfer = Transfer::new(remote_path);
        let result = self
            .upload_inner(&mut transfer, local_path, remote_path, mode)
            .await;
        match &result {
            Ok(()) => transfer.enter(TransferState::Done),
            Err(e) => {
                debug!("upload {} failed during {}: {}", remote_path, transfer.state, e);
                transfer.enter(TransferState::Error);
            }
        }
        result
    }

    async fn upload_inner(
        &self,
        transfer: &mut Transfer,
        local_path: &Path,
        remote_path: &str,
        mode: u32,
    ) -> Result<()> {
        let (dir, name) = split_remote_path(remote_path)?;
        let source = tokio::fs::File::open(local_path).await.map_err(|e| {
            std::io::Error::new(e.kind(), format!("{}: {}", local_path.display(), e))
        })?;
        let size = source.metadata().await?.len();
        let header = FileHeader { name, mode, size };

        let inner = self.lock_open().await?;
        transfer.enter(TransferState::SessionStart);
        let mut session = self.new_session(&inner).await?;
        let command = format!("scp -qt {}", shell_quote(&dir));
        let mut streams = session.start(&command).await?;
        let mut to_remote = streams.take_stdin()?;
        let mut from_remote = streams.take_stdout()?;
        let mut remote_stderr = streams.take_stderr()?;

        info!(
            "uploading {} ({} bytes) to {}:{}",
            local_path.display(),
            size,
            self.config().host,
            remote_path
        );

        let errors = match &self.config().stderr {
            Some(sink) => StreamFanout::new().with_sink(Arc::new(sink.clone())),
            None => StreamFanout::new(),
        };
        let observer = self.config().progress.clone();
        let (sent_tx, sent_rx) = tokio::sync::oneshot::channel();

        let mut tasks = ErrorAggregator::new(2);
        let mut driver = std::mem::replace(transfer, Transfer::new(remote_path));
        tasks.spawn("copy-protocol", async move {
            let sent = send_file(
                &mut driver,
                &mut to_remote,
                &mut from_remote,
                source,
                &header,
                observer,
            )
            .await;
            // Closing stdin lets the receiver exit
            let _ = to_remote.shutdown().await;
            drop(to_remote);
            let _ = sent_tx.send(driver.state);
            sent.map(drop)
        });
        tasks.spawn("stderr", async move {
            errors
                .copy_from(&mut remote_stderr)
                .await
                .map(drop)
                .map_err(|source| CourierError::Copy {
                    stream: "stderr",
                    source,
                })
        });

        let protocol = tasks.wait().await;
        if let Ok(reached) = sent_rx.await {
            transfer.state = reached;
        }
        protocol?;

        transfer.enter(TransferState::Wait);
        match session.wait().await? {
            Some(0) => {
                info!("uploaded {} bytes to {}", size, remote_path);
                Ok(())
            }
            code => Err(CourierError::RemoteExit { command, code }),
        }
    }
}
