//! Error types for shell-courier.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by user callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for shell-courier operations.
#[derive(Error, Debug)]
pub enum CourierError {
    /// The command line was empty before or after splitting.
    #[error("command cannot be empty")]
    EmptyCommand,

    /// The command line could not be parsed.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// A `<` or `>` redirect target could not be opened.
    #[error("failed to open redirect file {path}: {source}")]
    Redirect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A pipeline stage could not be spawned.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A local process exited unsuccessfully.
    #[error("`{command}` exited with {}", display_code(.code))]
    ExitStatus { command: String, code: Option<i32> },

    /// Copying one of the standard streams failed.
    #[error("{stream} copy failed: {source}")]
    Copy {
        stream: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid client or CLI configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The transport cannot use the requested authentication method.
    #[error("unsupported authentication method: {0}")]
    UnsupportedAuth(String),

    /// Dialing or authenticating to the remote host failed.
    #[error("failed to connect to {target}: {message}")]
    Connect { target: String, message: String },

    /// Dialing did not complete within the connect timeout.
    #[error("timed out after {timeout:?} connecting to {target}")]
    ConnectTimeout { target: String, timeout: Duration },

    /// The client has no open connection.
    #[error("client is not connected")]
    NotConnected,

    /// An earlier connection failure left the client unusable.
    #[error("client unusable after earlier failure: {0}")]
    Poisoned(String),

    /// A remote session could not be created or started.
    #[error("session error: {0}")]
    Session(String),

    /// The transport did not provide one of the session pipes.
    #[error("{0} pipe unavailable")]
    Pipe(&'static str),

    /// A remote command exited unsuccessfully.
    #[error("remote command `{command}` exited with {}", display_code(.code))]
    RemoteExit { command: String, code: Option<i32> },

    /// The expect callback aborted the interactive loop.
    #[error("expect callback failed: {0}")]
    Expect(#[source] BoxError),

    /// The copy-protocol receiver rejected the transfer.
    #[error("copy protocol error: {0}")]
    Protocol(String),

    /// Fewer or more bytes were streamed than the file size announced.
    #[error("transferred {sent} bytes but expected {expected}")]
    TransferMismatch { expected: u64, sent: u64 },

    /// An operation exceeded its deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    /// Invalid connection state transition attempted.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: crate::remote::ConnectionState,
        to: crate::remote::ConnectionState,
    },
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no exit status".to_string(),
    }
}

impl CourierError {
    /// Whether this error is a benign end-of-stream signal.
    pub fn is_end_of_stream(&self) -> bool {
        match self {
            Self::Io(e) | Self::Copy { source: e, .. } => is_benign_io(e),
            _ => false,
        }
    }
}

/// End-of-stream conditions that copy tasks treat as success.
pub fn is_benign_io(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::BrokenPipe
    )
}

/// Convenience Result type for shell-courier operations.
pub type Result<T> = std::result::Result<T, CourierError>;
