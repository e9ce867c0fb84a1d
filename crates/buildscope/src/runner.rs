//! Subprocess execution of the external build engine.
//!
//! The runner owns the subprocess lifetime exclusively. Arguments are
//! always passed as an argv vector, never concatenated into a shell
//! string, so user-supplied labels and query expressions cannot inject
//! shell syntax.
//!
//! Two modes:
//! - [`CommandRunner::run`] buffers stdout up to a configured cap and
//!   enforces a deadline; exceeding either surfaces a distinct error
//!   instead of truncating or hanging.
//! - [`CommandRunner::run_streaming`] hands back a [`ChunkStream`] of
//!   stdout chunks; dropping the stream terminates the subprocess within a
//!   bounded grace period.

use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};

/// Buffer size for the streaming channel, in chunks.
const CHANNEL_BUFFER_SIZE: usize = 64;

/// Captured output of a completed engine invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Spawns the engine executable and captures its output.
pub struct CommandRunner;

impl CommandRunner {
    /// Run the engine to completion, buffering stdout.
    ///
    /// Fails with [`Error::OutputTooLarge`] once stdout exceeds the
    /// configured cap, [`Error::Timeout`] when the deadline passes (the
    /// child is killed in both cases), and [`Error::CommandFailed`] or
    /// [`Error::QuerySyntax`] on a non-zero exit.
    pub async fn run(config: &EngineConfig, args: &[String]) -> Result<CommandOutput> {
        let output = Self::run_unchecked(config, args).await?;
        if output.exit_code != 0 {
            let command = render_command(&config.executable, args);
            if looks_like_syntax_error(&output.stderr) {
                return Err(Error::QuerySyntax {
                    stderr: output.stderr,
                    command,
                });
            }
            return Err(Error::CommandFailed {
                exit_code: output.exit_code,
                stderr: output.stderr,
                command,
            });
        }
        Ok(output)
    }

    /// Run the engine to completion without treating a non-zero exit as a
    /// failure.
    ///
    /// Output caps and the deadline still apply. Action verbs use this so
    /// a failing `test` or `run` keeps both output streams in its outcome.
    pub async fn run_unchecked(config: &EngineConfig, args: &[String]) -> Result<CommandOutput> {
        let command = render_command(&config.executable, args);
        debug!(%command, "running build engine");

        let mut child = spawn(config, args)?;
        let stdout = take_stdout(&mut child)?;
        let stderr = take_stderr(&mut child)?;
        let limit = config.max_buffer_bytes;

        let collected = tokio::time::timeout(
            config.timeout,
            collect(&mut child, stdout, stderr, limit, &command),
        )
        .await;

        match collected {
            Err(_) => {
                let _ = child.kill().await;
                Err(Error::Timeout {
                    elapsed: config.timeout,
                    command,
                })
            }
            Ok(Err(error)) => {
                let _ = child.kill().await;
                Err(error)
            }
            Ok(Ok((stdout, stderr, status))) => Ok(CommandOutput {
                stdout,
                stderr,
                exit_code: status.code().unwrap_or(-1),
            }),
        }
    }

    /// Run the engine and stream its stdout incrementally.
    ///
    /// The returned [`ChunkStream`] yields stdout chunks in emission
    /// order. A non-zero exit surfaces as a final `Err` item once stdout
    /// closes. Dropping the stream kills the subprocess.
    pub async fn run_streaming(config: &EngineConfig, args: &[String]) -> Result<ChunkStream> {
        let command = render_command(&config.executable, args);
        info!(%command, "running build engine (streaming)");

        let mut child = spawn(config, args)?;
        let pid = child.id();
        let stdout = take_stdout(&mut child)?;
        let stderr = take_stderr(&mut child)?;

        let (tx, rx) = mpsc::channel::<Result<String>>(CHANNEL_BUFFER_SIZE);
        let child = Arc::new(Mutex::new(child));

        // Collect stderr so a failing exit can carry its diagnostics.
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let stderr_sink = stderr_buf.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.trim().is_empty() {
                    debug!("engine stderr: {line}");
                    let mut buf = stderr_sink.lock().await;
                    buf.push_str(&line);
                    buf.push('\n');
                }
            }
        });

        // Forward stdout chunks; surface a failing exit as a final error.
        let tx_out = tx.clone();
        let child_for_exit = child.clone();
        let command_for_exit = command.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let mut chunk = line;
                        chunk.push('\n');
                        if tx_out.send(Ok(chunk)).await.is_err() {
                            // Consumer is gone; the cleanup task kills the child.
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        let _ = tx_out.send(Err(Error::Io(error.to_string()))).await;
                        return;
                    }
                }
            }

            let mut child = child_for_exit.lock().await;
            match child.wait().await {
                Ok(status) if !status.success() => {
                    let stderr = stderr_buf.lock().await.clone();
                    let error = if looks_like_syntax_error(&stderr) {
                        Error::QuerySyntax {
                            stderr,
                            command: command_for_exit,
                        }
                    } else {
                        Error::CommandFailed {
                            exit_code: status.code().unwrap_or(-1),
                            stderr,
                            command: command_for_exit,
                        }
                    };
                    let _ = tx_out.send(Err(error)).await;
                }
                Ok(_) => {}
                Err(error) => {
                    let _ = tx_out.send(Err(Error::Io(error.to_string()))).await;
                }
            }
        });

        // Kill the subprocess when the consumer drops the stream.
        tokio::spawn(async move {
            tx.closed().await;
            let mut child = child.lock().await;
            match child.try_wait() {
                Ok(Some(_)) => {}
                Ok(None) => {
                    info!("killing build engine process on stream drop");
                    if let Err(error) = child.kill().await {
                        warn!("failed to kill build engine process: {error}");
                    }
                }
                Err(error) => warn!("failed to check build engine process: {error}"),
            }
        });

        Ok(ChunkStream {
            rx: ReceiverStream::new(rx),
            pid,
            command,
        })
    }
}

/// Incremental stdout of a running engine invocation.
///
/// Dropping this stream terminates the owning subprocess; abandoned
/// consumers never leak long-running engine processes.
pub struct ChunkStream {
    rx: ReceiverStream<Result<String>>,
    pid: Option<u32>,
    command: String,
}

impl ChunkStream {
    /// OS process id of the subprocess, while it is running.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The rendered command line that was invoked.
    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Stream for ChunkStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

fn spawn(config: &EngineConfig, args: &[String]) -> Result<Child> {
    let mut cmd = Command::new(&config.executable);
    cmd.args(args)
        .current_dir(&config.workspace_root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd.spawn().map_err(|error| Error::Spawn {
        path: config.executable.clone(),
        reason: error.to_string(),
    })
}

fn take_stdout(child: &mut Child) -> Result<ChildStdout> {
    child
        .stdout
        .take()
        .ok_or_else(|| Error::Io("missing stdout pipe".to_string()))
}

fn take_stderr(child: &mut Child) -> Result<ChildStderr> {
    child
        .stderr
        .take()
        .ok_or_else(|| Error::Io("missing stderr pipe".to_string()))
}

/// Read stdout up to `limit` bytes, then wait for exit and stderr.
async fn collect(
    child: &mut Child,
    mut stdout: ChildStdout,
    stderr: ChildStderr,
    limit: u64,
    command: &str,
) -> Result<(String, String, std::process::ExitStatus)> {
    let stderr_task = tokio::spawn(async move {
        let mut stderr = stderr;
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        buf
    });

    let mut out = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = stdout
            .read(&mut chunk)
            .await
            .map_err(|error| Error::Io(error.to_string()))?;
        if n == 0 {
            break;
        }
        if (out.len() + n) as u64 > limit {
            return Err(Error::OutputTooLarge {
                limit,
                command: command.to_string(),
            });
        }
        out.extend_from_slice(&chunk[..n]);
    }

    let status = child
        .wait()
        .await
        .map_err(|error| Error::Io(error.to_string()))?;
    let err = stderr_task.await.unwrap_or_default();
    Ok((
        String::from_utf8_lossy(&out).into_owned(),
        String::from_utf8_lossy(&err).into_owned(),
        status,
    ))
}

/// Render the argv vector into the command line shown in diagnostics.
pub(crate) fn render_command(executable: &Path, args: &[String]) -> String {
    let mut rendered = executable.display().to_string();
    for arg in args {
        rendered.push(' ');
        if arg.is_empty() || arg.chars().any(char::is_whitespace) {
            rendered.push('\'');
            rendered.push_str(arg);
            rendered.push('\'');
        } else {
            rendered.push_str(arg);
        }
    }
    rendered
}

/// Whether stderr looks like the engine rejecting the query expression,
/// as opposed to any other failure.
pub(crate) fn looks_like_syntax_error(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("syntax error")
        || lower.contains("error in query")
        || lower.contains("unexpected token")
}
