//! Interactive automation: answer remote prompts from accumulated output.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{BoxError, CourierError};
use crate::stream::{BoxedWriter, ByteSink};
use crate::Result;

/// Decides what to type into a remote command given its output so far.
pub trait ExpectCallback: Send + Sync {
    /// Inspect the merged stdout/stderr text accumulated so far.
    ///
    /// Return the input to send, or an empty string to keep waiting.
    /// An error aborts the interactive loop.
    fn respond(&self, output: &str) -> std::result::Result<String, BoxError>;

    /// Whether this callback never answers, so no expect loop is needed.
    fn is_passive(&self) -> bool {
        false
    }
}

/// Callback that never answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExpect;

impl ExpectCallback for NoExpect {
    fn respond(&self, _output: &str) -> std::result::Result<String, BoxError> {
        Ok(String::new())
    }

    fn is_passive(&self) -> bool {
        true
    }
}

impl<F> ExpectCallback for F
where
    F: Fn(&str) -> std::result::Result<String, BoxError> + Send + Sync,
{
    fn respond(&self, output: &str) -> std::result::Result<String, BoxError> {
        self(output)
    }
}

/// Answers prompts by substring match.
///
/// Each appearance of a prompt in the output is answered exactly once,
/// with the answer followed by a newline.
#[derive(Debug, Default)]
pub struct PromptResponder {
    rules: Vec<(String, String)>,
    answered: Mutex<Vec<usize>>,
}

impl PromptResponder {
    /// Create a responder with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `prompt` with `answer`.
    pub fn on(mut self, prompt: impl Into<String>, answer: impl Into<String>) -> Self {
        self.rules.push((prompt.into(), answer.into()));
        self
    }
}

impl ExpectCallback for PromptResponder {
    fn respond(&self, output: &str) -> std::result::Result<String, BoxError> {
        let mut answered = self
            .answered
            .lock()
            .map_err(|_| BoxError::from("prompt responder lock poisoned"))?;
        answered.resize(self.rules.len(), 0);

        let mut reply = String::new();
        for (index, (prompt, answer)) in self.rules.iter().enumerate() {
            let seen = output.matches(prompt.as_str()).count();
            while answered[index] < seen {
                answered[index] += 1;
                reply.push_str(answer);
                reply.push('\n');
            }
        }
        Ok(reply)
    }
}

struct MergedState {
    bytes: Vec<u8>,
    listener: Option<mpsc::Sender<String>>,
}

/// Buffer combining remote stdout and stderr.
///
/// Every write delivers a snapshot of the whole buffer to the listener
/// while still holding the buffer lock, so the listener sees each state in
/// order. Once the listener is gone, writes only accumulate.
pub struct MergedOutput {
    state: tokio::sync::Mutex<MergedState>,
}

impl MergedOutput {
    /// Create a buffer and the receiver of its snapshots.
    pub fn observed() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(1);
        let merged = Self {
            state: tokio::sync::Mutex::new(MergedState {
                bytes: Vec::new(),
                listener: Some(tx),
            }),
        };
        (merged, rx)
    }

    /// Everything written so far, decoded lossily.
    pub async fn text(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().await.bytes).into_owned()
    }
}

#[async_trait]
impl ByteSink for MergedOutput {
    async fn write_chunk(&self, chunk: &[u8]) -> std::io::Result<()> {
        let mut state = self.state.lock().await;
        state.bytes.extend_from_slice(chunk);
        if let Some(listener) = state.listener.clone() {
            let snapshot = String::from_utf8_lossy(&state.bytes).into_owned();
            if listener.send(snapshot).await.is_err() {
                state.listener = None;
            }
        }
        Ok(())
    }
}

/// Feed each merged-output snapshot to `callback`, writing its answers to `stdin`.
///
/// Ends when the snapshot channel closes (both output streams finished)
/// or when the callback fails.
pub async fn expect_loop(
    callback: Arc<dyn ExpectCallback>,
    mut updates: mpsc::Receiver<String>,
    mut stdin: BoxedWriter,
) -> Result<()> {
    while let Some(output) = updates.recv().await {
        let input = callback.respond(&output).map_err(CourierError::Expect)?;
        if input.is_empty() {
            continue;
        }
        debug!("expect loop answering with {} bytes", input.len());
        let sent = async {
            stdin.write_all(input.as_bytes()).await?;
            stdin.flush().await
        };
        sent.await.map_err(|source| CourierError::Copy {
            stream: "stdin",
            source,
        })?;
    }
    debug!("expect loop finished");
    Ok(())
}
