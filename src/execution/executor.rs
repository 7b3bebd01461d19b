//! Local pipeline executor.

use std::io::Cursor;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use tokio::fs::{File, OpenOptions};
use tokio::process::Command;
use tracing::debug;

use super::io::IoConfig;
use super::stage::{parse_pipeline, PipelineStage};
use crate::error::CourierError;
use crate::stream::{
    merge_sources, BoxedReader, CaptureBuffer, ErrorAggregator, SharedSink, StreamFanout,
};
use crate::Result;

/// Streams wired to one stage, with every redirect file already open.
struct StageIo {
    /// Redirect input files, read after the upstream bytes.
    input_files: Vec<File>,
    /// Sinks for the stage's stdout.
    stdout: StreamFanout,
    /// Buffer feeding the next stage and the returned output.
    captured: CaptureBuffer,
}

/// Runs `|`-chained command lines as local subprocesses.
///
/// Stages run one after another. Each stage's output is captured into a
/// per-stage buffer which becomes the next stage's input, so a failing
/// stage stops the pipeline without leaving downstream processes behind.
pub struct PipelineExecutor {
    io: IoConfig,
    sudo_password: Option<String>,
}

impl PipelineExecutor {
    /// Create an executor with the given streams.
    pub fn new(io: IoConfig) -> Self {
        Self {
            io,
            sudo_password: None,
        }
    }

    /// Run the first stage through `sudo -S`, answering its password prompt.
    pub fn with_sudo(mut self, password: impl Into<String>) -> Self {
        self.sudo_password = Some(password.into());
        self
    }

    /// Evaluate `command_line`, returning the last stage's captured output.
    pub async fn eval(self, command_line: &str) -> Result<String> {
        let deadline = self.io.timeout;
        match deadline {
            Some(timeout) => tokio::time::timeout(timeout, self.eval_inner(command_line))
                .await
                .map_err(|_| CourierError::Timeout {
                    operation: format!("`{}`", command_line),
                    timeout,
                })?,
            None => self.eval_inner(command_line).await,
        }
    }

    async fn eval_inner(mut self, command_line: &str) -> Result<String> {
        let mut stages = parse_pipeline(command_line)?;
        if self.sudo_password.is_some() {
            if let Some(first) = stages.first_mut() {
                first.elevate();
            }
        }

        // Open every redirect before spawning anything
        let mut wiring = Vec::with_capacity(stages.len());
        for (index, stage) in stages.iter().enumerate() {
            let last = index + 1 == stages.len();
            wiring.push(self.prepare(stage, last).await?);
        }

        let mut initial: Vec<BoxedReader> = Vec::new();
        if let Some(password) = self.sudo_password.take() {
            initial.push(Box::new(Cursor::new(format!("{}\n", password).into_bytes())));
        }
        if let Some(stdin) = self.io.stdin.take() {
            initial.push(stdin);
        }

        // outputs[i] holds what stage i wrote; stage i + 1 reads it
        let mut outputs: Vec<CaptureBuffer> = Vec::with_capacity(stages.len());
        for (index, (stage, io)) in stages.iter().zip(wiring).enumerate() {
            let mut sources = match outputs.last() {
                Some(previous) => vec![Box::new(Cursor::new(previous.contents())) as BoxedReader],
                None => std::mem::take(&mut initial),
            };
            sources.extend(
                io.input_files
                    .into_iter()
                    .map(|file| Box::new(file) as BoxedReader),
            );

            debug!("pipeline stage {}/{}: {}", index + 1, stages.len(), stage);
            self.run_stage(stage, sources, io.stdout).await?;
            outputs.push(io.captured);
        }

        Ok(outputs.last().map(CaptureBuffer::text).unwrap_or_default())
    }

    async fn prepare(&self, stage: &PipelineStage, last: bool) -> Result<StageIo> {
        let mut input_files = Vec::with_capacity(stage.input_files.len());
        for path in &stage.input_files {
            input_files.push(open_input(path).await?);
        }

        let captured = CaptureBuffer::new();
        let mut stdout = StreamFanout::new();
        if last {
            if let Some(sink) = &self.io.stdout {
                stdout.push(Arc::new(sink.clone()));
            }
        }
        // Redirected output is not captured
        if stage.output_files.is_empty() {
            stdout.push(Arc::new(captured.clone()));
        }
        for path in &stage.output_files {
            stdout.push(Arc::new(SharedSink::new(open_output(path).await?)));
        }

        Ok(StageIo {
            input_files,
            stdout,
            captured,
        })
    }

    async fn run_stage(
        &self,
        stage: &PipelineStage,
        sources: Vec<BoxedReader>,
        stdout: StreamFanout,
    ) -> Result<()> {
        let mut command = Command::new(stage.program());
        command
            .args(stage.args())
            .envs(&self.io.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.io.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| CourierError::Spawn {
            program: stage.program().to_string(),
            source,
        })?;
        let mut child_stdin = child.stdin.take().ok_or(CourierError::Pipe("stdin"))?;
        let mut child_stdout = child.stdout.take().ok_or(CourierError::Pipe("stdout"))?;
        let mut child_stderr = child.stderr.take().ok_or(CourierError::Pipe("stderr"))?;

        let mut stderr = StreamFanout::new();
        if let Some(sink) = &self.io.stderr {
            stderr.push(Arc::new(sink.clone()));
        }

        let mut tasks = ErrorAggregator::new(3);
        tasks.spawn("stdin", async move {
            let fed = merge_sources(sources, &mut child_stdin).await;
            // Dropping the pipe signals end-of-input to the child
            drop(child_stdin);
            fed.map(drop).map_err(|source| CourierError::Copy {
                stream: "stdin",
                source,
            })
        });
        tasks.spawn("stdout", async move {
            stdout
                .copy_from(&mut child_stdout)
                .await
                .map(drop)
                .map_err(|source| CourierError::Copy {
                    stream: "stdout",
                    source,
                })
        });
        tasks.spawn("stderr", async move {
            stderr
                .copy_from(&mut child_stderr)
                .await
                .map(drop)
                .map_err(|source| CourierError::Copy {
                    stream: "stderr",
                    source,
                })
        });
        tasks.wait().await?;

        let status = child.wait().await?;
        if !status.success() {
            return Err(CourierError::ExitStatus {
                command: stage.to_string(),
                code: status.code(),
            });
        }
        Ok(())
    }
}

async fn open_input(path: &Path) -> Result<File> {
    File::open(path).await.map_err(|source| CourierError::Redirect {
        path: path.to_path_buf(),
        source,
    })
}

async fn open_output(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await
        .map_err(|source| CourierError::Redirect {
            path: path.to_path_buf(),
            source,
        })
}

/// Evaluate a command line with the given streams.
pub async fn eval(command_line: &str, io: IoConfig) -> Result<String> {
    PipelineExecutor::new(io).eval(command_line).await
}

/// Run a command line, echoing its output to this process's stdout/stderr.
pub async fn command(command_line: &str) -> Result<String> {
    eval(command_line, IoConfig::inherit()).await
}

/// Like [`command`], with the first stage run through `sudo -S`.
pub async fn sudo_command(command_line: &str, password: &str) -> Result<String> {
    PipelineExecutor::new(IoConfig::inherit())
        .with_sudo(password)
        .eval(command_line)
        .await
}
