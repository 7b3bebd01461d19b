//! Transport abstraction: dial once, then open command sessions.

use async_trait::async_trait;

use super::config::RemoteConfig;
use crate::error::CourierError;
use crate::stream::{BoxedReader, BoxedWriter};
use crate::Result;

/// The three pipes of a started remote command.
#[derive(Default)]
pub struct SessionStreams {
    pub stdin: Option<BoxedWriter>,
    pub stdout: Option<BoxedReader>,
    pub stderr: Option<BoxedReader>,
}

impl SessionStreams {
    /// Take the stdin pipe.
    pub fn take_stdin(&mut self) -> Result<BoxedWriter> {
        self.stdin.take().ok_or(CourierError::Pipe("stdin"))
    }

    /// Take the stdout pipe.
    pub fn take_stdout(&mut self) -> Result<BoxedReader> {
        self.stdout.take().ok_or(CourierError::Pipe("stdout"))
    }

    /// Take the stderr pipe.
    pub fn take_stderr(&mut self) -> Result<BoxedReader> {
        self.stderr.take().ok_or(CourierError::Pipe("stderr"))
    }
}

/// Dials and authenticates connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish an authenticated connection described by `config`.
    async fn connect(&self, config: &RemoteConfig) -> Result<Box<dyn Connection>>;
}

/// An authenticated connection able to host command sessions.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Open a fresh session bound to this connection.
    async fn new_session(&self) -> Result<Box<dyn RemoteSession>>;

    /// Tear the connection down.
    async fn close(&mut self) -> Result<()>;
}

/// One remote command execution.
#[async_trait]
pub trait RemoteSession: Send {
    /// Start `command`, returning its pipes.
    async fn start(&mut self, command: &str) -> Result<SessionStreams>;

    /// Wait for the command to exit, returning its exit code if it has one.
    async fn wait(&mut self) -> Result<Option<i32>>;
}
