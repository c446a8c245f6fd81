//! Test doubles for the agent process.
//!
//! [`MockAgent`] scripts a sequence of invocation results so the whole loop
//! controller can be exercised without spawning a real CLI. Used by the unit
//! tests here and available to downstream integration tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::agent::{AgentInvocation, AgentProcess, InvocationOutcome};
use crate::error::Result;
use crate::outcome::{STATUS_BEGIN, STATUS_END};

/// One scripted invocation result.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// The process completes cleanly with this stdout.
    Transcript(String),
    /// The process goes silent and is killed by the idle timeout.
    Timeout,
    /// The process exits non-zero.
    Crash { exit_code: i32, stderr: String },
    /// The invocation never finishes on its own; only cancellation ends it.
    Hang,
}

impl MockResponse {
    /// Shorthand for a completed invocation with the given transcript.
    #[must_use]
    pub fn transcript(text: impl Into<String>) -> Self {
        Self::Transcript(text.into())
    }
}

/// Scripted [`AgentProcess`] that replays responses in order.
///
/// When the script runs out it returns empty completed transcripts, which
/// the extractor classifies as `NoStatusReported`.
#[derive(Debug)]
pub struct MockAgent {
    responses: Mutex<VecDeque<MockResponse>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockAgent {
    /// Create an agent that replays `responses` in order.
    #[must_use]
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle for inspecting the prompts the agent received, usable after
    /// the agent itself has been moved into the controller.
    #[must_use]
    pub fn handle(&self) -> MockAgentHandle {
        MockAgentHandle {
            prompts: Arc::clone(&self.prompts),
        }
    }
}

/// Inspection handle for a [`MockAgent`].
#[derive(Debug, Clone)]
pub struct MockAgentHandle {
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockAgentHandle {
    /// The prompts received so far, in order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AgentProcess for MockAgent {
    async fn invoke(
        &self,
        prompt: &str,
        _idle_timeout: Duration,
        transcript_path: &Path,
    ) -> Result<AgentInvocation> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        let response = self
            .responses
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .unwrap_or_else(|| MockResponse::Transcript(String::new()));

        let started_at = Utc::now();
        let invocation = match response {
            MockResponse::Transcript(transcript) => {
                tokio::fs::write(transcript_path, &transcript).await?;
                AgentInvocation {
                    outcome: InvocationOutcome::Completed,
                    exit_code: Some(0),
                    transcript,
                    stderr: String::new(),
                    started_at,
                    ended_at: Utc::now(),
                }
            }
            MockResponse::Timeout => {
                tokio::fs::write(transcript_path, "").await?;
                AgentInvocation {
                    outcome: InvocationOutcome::Timeout,
                    exit_code: None,
                    transcript: String::new(),
                    stderr: String::new(),
                    started_at,
                    ended_at: Utc::now(),
                }
            }
            MockResponse::Crash { exit_code, stderr } => {
                tokio::fs::write(transcript_path, "").await?;
                AgentInvocation {
                    outcome: InvocationOutcome::Crashed,
                    exit_code: Some(exit_code),
                    transcript: String::new(),
                    stderr,
                    started_at,
                    ended_at: Utc::now(),
                }
            }
            MockResponse::Hang => {
                tokio::fs::write(transcript_path, "").await?;
                std::future::pending::<()>().await;
                unreachable!("a pending future resolved")
            }
        };
        Ok(invocation)
    }
}

/// Build a transcript ending in a well-formed status block.
#[must_use]
pub fn status_transcript(status: &str, story_id: &str, passed: bool, exit_signal: bool) -> String {
    format!(
        "Working on {story_id}...\nDone.\n{STATUS_BEGIN}\nSTATUS: {status}\nSTORY_ID: {story_id}\nSTORY_PASSED: {passed}\nFILES_MODIFIED: []\nEXIT_SIGNAL: {exit_signal}\n{STATUS_END}\n"
    )
}
