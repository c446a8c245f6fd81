//! Agent process driver.
//!
//! Wraps the `claude` CLI behind the [`AgentProcess`] trait so the loop
//! controller can be driven by a scripted fake in tests. The driver streams
//! stdout line-by-line into the session transcript and enforces an
//! idle-output timeout: the clock resets on every line, so a long-running but
//! chatty invocation is fine while a silent hang gets killed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{LoopError, Result};

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationOutcome {
    /// The process exited with status 0.
    Completed,
    /// No output for the idle-timeout window; the process was killed.
    Timeout,
    /// The process exited non-zero or could not be read.
    Crashed,
}

/// The result of one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub outcome: InvocationOutcome,
    /// Exit code when the process exited on its own.
    pub exit_code: Option<i32>,
    /// Everything the agent wrote to stdout.
    pub transcript: String,
    /// Trailing stderr, kept for the invocation record on failure.
    pub stderr: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// A process that takes a prompt and produces a transcript.
#[async_trait]
pub trait AgentProcess: Send + Sync {
    /// Run one invocation: feed `prompt` on stdin, stream stdout to
    /// `transcript_path`, kill the process if it goes silent for
    /// `idle_timeout`.
    ///
    /// Per-invocation problems (timeout, crash) are reported in the returned
    /// [`AgentInvocation`]; only spawn failures are errors.
    async fn invoke(
        &self,
        prompt: &str,
        idle_timeout: Duration,
        transcript_path: &Path,
    ) -> Result<AgentInvocation>;
}

/// Drives the real `claude` CLI.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    command: String,
    model: String,
    project_dir: PathBuf,
}

impl ClaudeCli {
    /// Create a driver running `claude` in `project_dir` with the given model.
    #[must_use]
    pub fn new(project_dir: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            command: "claude".to_string(),
            model: model.into(),
            project_dir: project_dir.into(),
        }
    }

    /// Override the binary name (mainly for tests).
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    /// Fail fast if the agent binary is not on PATH.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::AgentSpawn`] when the binary cannot be resolved.
    pub fn check_available(&self) -> Result<()> {
        which::which(&self.command).map_err(|e| {
            LoopError::agent_spawn(&self.command, format!("not found on PATH: {e}"))
        })?;
        Ok(())
    }
}

#[async_trait]
impl AgentProcess for ClaudeCli {
    async fn invoke(
        &self,
        prompt: &str,
        idle_timeout: Duration,
        transcript_path: &Path,
    ) -> Result<AgentInvocation> {
        let started_at = Utc::now();

        debug!(
            model = %self.model,
            prompt_chars = prompt.len(),
            "spawning agent process"
        );

        let mut child = Command::new(&self.command)
            .args([
                "-p",
                "--dangerously-skip-permissions",
                "--model",
                &self.model,
                "--output-format",
                "text",
            ])
            .current_dir(&self.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // If we drop the child (timeout, ctrl-c) the process dies with us.
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LoopError::agent_spawn(&self.command, e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.flush().await?;
            drop(stdin);
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LoopError::agent_spawn(&self.command, "stdout not captured"))?;
        let stderr = child.stderr.take();

        // Drain stderr concurrently so the child never blocks on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let mut transcript_file = File::create(transcript_path).await?;
        let mut lines = BufReader::new(stdout).lines();
        let mut transcript = String::new();
        let mut timed_out = false;
        let mut read_error: Option<std::io::Error> = None;

        loop {
            match tokio::time::timeout(idle_timeout, lines.next_line()).await {
                Ok(Ok(Some(line))) => {
                    transcript_file.write_all(line.as_bytes()).await?;
                    transcript_file.write_all(b"\n").await?;
                    transcript_file.flush().await?;
                    transcript.push_str(&line);
                    transcript.push('\n');
                }
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    // A still-writing child with nobody draining stdout would
                    // block forever, so kill it before waiting.
                    warn!(error = %e, "failed reading agent stdout, killing the process");
                    let _ = child.start_kill();
                    read_error = Some(e);
                    break;
                }
                Err(_) => {
                    warn!(
                        idle_secs = idle_timeout.as_secs(),
                        "agent produced no output within the idle window, killing it"
                    );
                    let _ = child.start_kill();
                    timed_out = true;
                    break;
                }
            }
        }

        let mut stderr_text = stderr_task.await.unwrap_or_default();

        let (outcome, exit_code) = if timed_out {
            let _ = child.wait().await;
            (InvocationOutcome::Timeout, None)
        } else if let Some(e) = read_error {
            let _ = child.wait().await;
            if !stderr_text.is_empty() {
                stderr_text.push('\n');
            }
            stderr_text.push_str(&format!("stdout read error: {e}"));
            (InvocationOutcome::Crashed, None)
        } else {
            let status = child.wait().await?;
            if status.success() {
                (InvocationOutcome::Completed, status.code())
            } else {
                warn!(code = ?status.code(), "agent process exited non-zero");
                (InvocationOutcome::Crashed, status.code())
            }
        };

        Ok(AgentInvocation {
            outcome,
            exit_code,
            transcript,
            stderr: stderr_text,
            started_at,
            ended_at: Utc::now(),
        })
    }
}
