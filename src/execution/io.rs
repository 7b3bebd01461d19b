//! Stream configuration for a pipeline evaluation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::AsyncRead;

use crate::stream::{BoxedReader, SharedSink};

/// Where a pipeline reads its input and sends its output.
///
/// `stdin` feeds the first stage. `stdout` receives the last stage's
/// output unless that stage redirects with `>`. `stderr` receives the
/// error output of every stage. Missing streams are treated as empty
/// input or discarded output.
#[derive(Default)]
pub struct IoConfig {
    /// Input for the first stage.
    pub stdin: Option<BoxedReader>,
    /// Sink for the last stage's output.
    pub stdout: Option<SharedSink>,
    /// Sink for every stage's error output.
    pub stderr: Option<SharedSink>,
    /// Working directory for every stage.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for every stage.
    pub env: HashMap<String, String>,
    /// Overall deadline for the pipeline.
    pub timeout: Option<Duration>,
}

impl IoConfig {
    /// Create a configuration with no streams attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Echo output to the process stdout and stderr.
    pub fn inherit() -> Self {
        Self::new()
            .stdout(SharedSink::stdout())
            .stderr(SharedSink::stderr())
    }

    /// Set the input of the first stage.
    pub fn stdin<R>(mut self, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.stdin = Some(Box::new(reader));
        self
    }

    /// Set the output sink.
    pub fn stdout(mut self, sink: SharedSink) -> Self {
        self.stdout = Some(sink);
        self
    }

    /// Set the error sink.
    pub fn stderr(mut self, sink: SharedSink) -> Self {
        self.stderr = Some(sink);
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the overall deadline.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

impl std::fmt::Debug for IoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoConfig")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("working_dir", &self.working_dir)
            .field("env", &self.env)
            .field("timeout", &self.timeout)
            .finish()
    }
}
