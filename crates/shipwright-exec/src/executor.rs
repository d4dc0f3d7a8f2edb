use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::sandbox::Sandbox;
use crate::{ExecError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

// ─── CommandSpec ──────────────────────────────────────────────────────────

/// A command to run: argument vector, wall-clock timeout, working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub timeout: Duration,
    pub workdir: Option<String>,
}

impl CommandSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            timeout: DEFAULT_TIMEOUT,
            workdir: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// True if the argv starts with `prefix`.
    pub fn starts_with(&self, prefix: &[&str]) -> bool {
        self.argv.len() >= prefix.len() && self.argv.iter().zip(prefix).all(|(a, p)| a == p)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv.join(" "))
    }
}

// ─── Output ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Stdout with surrounding whitespace removed; most callers want this.
    pub fn trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Receives output lines as they are produced.
pub trait LineSink: Send + Sync {
    fn line(&self, stream: OutputStream, line: &str);
}

/// Discards every line.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LineSink for NullSink {
    fn line(&self, _stream: OutputStream, _line: &str) {}
}

// ─── CommandRunner ────────────────────────────────────────────────────────

/// Anything that can run a [`CommandSpec`] to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec`, streaming each output line into `sink`.
    ///
    /// Fails with [`ExecError::Timeout`] past `spec.timeout`,
    /// [`ExecError::OutputTooLarge`] past the output ceiling, and
    /// [`ExecError::NonZeroExit`] on a non-zero exit status.
    async fn run(&self, spec: &CommandSpec, sink: &dyn LineSink) -> Result<CommandOutput>;
}

// ─── Executor ─────────────────────────────────────────────────────────────

/// Runs commands through a [`Sandbox`], capturing at most
/// `max_output_bytes` of combined stdout and stderr.
pub struct Executor<S> {
    sandbox: S,
    max_output_bytes: usize,
}

impl<S: Sandbox> Executor<S> {
    pub fn new(sandbox: S, max_output_bytes: usize) -> Self {
        Self {
            sandbox,
            max_output_bytes,
        }
    }
}

#[async_trait]
impl<S: Sandbox> CommandRunner for Executor<S> {
    async fn run(&self, spec: &CommandSpec, sink: &dyn LineSink) -> Result<CommandOutput> {
        let mut cmd = self.sandbox.command(spec)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(sandbox = self.sandbox.name(), command = %spec, "spawning");
        let mut child = cmd.spawn().map_err(|e| ExecError::Spawn {
            program: spec.argv.first().cloned().unwrap_or_default(),
            source: e,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::Process("stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::Process("stderr not captured".into()))?;

        let limit = self.max_output_bytes;
        let (tx, mut rx) = mpsc::channel::<Chunk>(256);
        spawn_reader(stdout, OutputStream::Stdout, limit, tx.clone());
        spawn_reader(stderr, OutputStream::Stderr, limit, tx);

        let drive = async {
            let mut out = CommandOutput::default();
            let mut captured = 0usize;
            while let Some(chunk) = rx.recv().await {
                let (stream, line) = match chunk {
                    Chunk::Line(stream, line) => (stream, line),
                    Chunk::Overflow => {
                        return Err(ExecError::OutputTooLarge {
                            command: spec.to_string(),
                            limit,
                        })
                    }
                };
                captured += line.len() + 1;
                if captured > limit {
                    return Err(ExecError::OutputTooLarge {
                        command: spec.to_string(),
                        limit,
                    });
                }
                sink.line(stream, &line);
                let buf = match stream {
                    OutputStream::Stdout => &mut out.stdout,
                    OutputStream::Stderr => &mut out.stderr,
                };
                if !buf.is_empty() {
                    buf.push('\n');
                }
                buf.push_str(&line);
            }
            let status = child.wait().await?;
            // Killed by signal (Unix) has no code.
            out.exit_code = status.code().unwrap_or(-1);
            Ok(out)
        };

        let result = tokio::time::timeout(spec.timeout, drive).await;
        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                let _ = child.kill().await;
                return Err(e);
            }
            Err(_) => {
                warn!(command = %spec, timeout_secs = spec.timeout.as_secs(), "command timed out");
                let _ = child.kill().await;
                return Err(ExecError::Timeout {
                    command: spec.to_string(),
                    after: spec.timeout,
                });
            }
        };

        if output.exit_code != 0 {
            let stderr = output.stderr.trim();
            let message = if stderr.is_empty() {
                "command failed without error output".to_string()
            } else {
                stderr.to_string()
            };
            return Err(ExecError::NonZeroExit {
                command: spec.to_string(),
                code: output.exit_code,
                message,
            });
        }

        Ok(output)
    }
}

/// What a pipe reader hands to the drive loop.
enum Chunk {
    Line(OutputStream, String),
    /// The stream produced more than the output ceiling.
    Overflow,
}

/// Read `reader` line by line until EOF, decoding lossily.
///
/// Never reads more than `limit + 1` bytes in total, so a single unterminated
/// line cannot outgrow the ceiling before the drive loop sees it.
fn spawn_reader<R>(reader: R, stream: OutputStream, limit: usize, tx: mpsc::Sender<Chunk>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut total = 0usize;
        loop {
            buf.clear();
            let budget = limit.saturating_sub(total) as u64 + 1;
            let n = match (&mut reader).take(budget).read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(?stream, error = %e, "failed to read command output");
                    break;
                }
            };
            total += n;
            if total > limit {
                let _ = tx.send(Chunk::Overflow).await;
                break;
            }
            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            }
            let line = String::from_utf8_lossy(&buf).into_owned();
            if tx.send(Chunk::Line(stream, line)).await.is_err() {
                break;
            }
        }
    });
}
