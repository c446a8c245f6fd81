//! Session recording: durable per-run state, per-invocation records, and the
//! end-of-run summary.
//!
//! Each run gets its own directory under the logs root, named
//! `session_YYYYMMDD_HHMMSS`. Inside:
//!
//! - `config.json` - the resolved [`RunConfig`](crate::config::RunConfig)
//! - `backlog_snapshot.json` - the backlog as it was at start
//! - `state.json` - the resumable [`RunState`], rewritten atomically after
//!   every iteration
//! - `iteration_NNN.log` - the raw transcript of each invocation
//! - `summary.json` - the [`SessionSummary`], written exactly once at exit

mod recorder;

pub use recorder::{latest_session, load_state, SessionRecorder};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::InvocationOutcome;

/// Everything needed to resume a run: counters, breaker state, and the
/// in-flight call-budget window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunState {
    /// Session directory name this state was written under.
    pub session_id: String,
    /// Completed iterations so far.
    pub iteration: u32,
    pub successful_invocations: u32,
    pub failed_invocations: u32,
    /// Breaker counters, restored verbatim on resume.
    pub consecutive_failures: u32,
    pub consecutive_no_progress: u32,
    /// Call timestamps still inside the budget window.
    pub call_timestamps: Vec<DateTime<Utc>>,
    /// Story targeted by the most recent iteration, if any.
    pub current_story_id: Option<String>,
    /// SHA-256 of the backlog file when this state was written.
    pub backlog_fingerprint: String,
}

/// One line of the session's invocation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvocationRecord {
    pub iteration: u32,
    pub story_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: InvocationOutcome,
    /// What the agent reported, when it reported anything usable.
    pub story_passed: Option<bool>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    pub exit_signal: bool,
    /// Transcript file name relative to the session directory.
    pub transcript_file: String,
    /// Extraction failure detail or stderr tail, when relevant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Written once when the run ends, whatever the reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: i64,
    /// Stable termination-reason string, e.g. `all_complete`.
    pub exit_reason: String,
    pub total_iterations: u32,
    pub successful_invocations: u32,
    pub failed_invocations: u32,
    pub stories_total: usize,
    pub stories_passed: usize,
    pub stories_passed_this_session: usize,
    pub invocations: Vec<InvocationRecord>,
}
