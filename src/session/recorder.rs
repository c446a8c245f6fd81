//! Session directory management and durable writes.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::backlog::Backlog;
use crate::config::RunConfig;
use crate::error::Result;
use crate::persist;
use crate::session::{InvocationRecord, RunState, SessionSummary};

const STATE_FILE: &str = "state.json";
const CONFIG_FILE: &str = "config.json";
const BACKLOG_SNAPSHOT_FILE: &str = "backlog_snapshot.json";
const SUMMARY_FILE: &str = "summary.json";
const SESSION_PREFIX: &str = "session_";

/// Owns one session directory and all writes into it.
#[derive(Debug)]
pub struct SessionRecorder {
    session_id: String,
    dir: PathBuf,
    started_at: DateTime<Utc>,
    invocations: Vec<InvocationRecord>,
    summary_written: bool,
}

impl SessionRecorder {
    /// Create a fresh session directory under `logs_root`.
    pub fn create(logs_root: &Path) -> Result<Self> {
        let started_at = Utc::now();
        let session_id = format!("{SESSION_PREFIX}{}", started_at.format("%Y%m%d_%H%M%S"));
        let dir = logs_root.join(&session_id);
        fs::create_dir_all(&dir)?;

        info!(session = %session_id, dir = %dir.display(), "session started");

        Ok(Self {
            session_id,
            dir,
            started_at,
            invocations: Vec::new(),
            summary_written: false,
        })
    }

    /// The session directory name (`session_YYYYMMDD_HHMMSS`).
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The session directory path.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// When the session started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Snapshot the resolved configuration.
    pub fn write_config_snapshot(&self, config: &RunConfig) -> Result<()> {
        persist::write_json(&self.dir.join(CONFIG_FILE), config)
    }

    /// Snapshot the backlog as it was at session start.
    pub fn write_backlog_snapshot(&self, backlog: &Backlog) -> Result<()> {
        persist::write_json(&self.dir.join(BACKLOG_SNAPSHOT_FILE), backlog)
    }

    /// Transcript path for an iteration (`iteration_001.log`, ...).
    #[must_use]
    pub fn transcript_path(&self, iteration: u32) -> PathBuf {
        self.dir.join(format!("iteration_{iteration:03}.log"))
    }

    /// Persist the resumable state. Called after every iteration so a kill
    /// at any point loses at most the in-flight iteration.
    pub fn write_state(&self, state: &RunState) -> Result<()> {
        persist::write_json(&self.dir.join(STATE_FILE), state)
    }

    /// Append an invocation record to the in-memory history.
    pub fn record_invocation(&mut self, record: InvocationRecord) {
        self.invocations.push(record);
    }

    /// Invocation history recorded so far.
    #[must_use]
    pub fn invocations(&self) -> &[InvocationRecord] {
        &self.invocations
    }

    /// Write the summary. Guarded so a second call (e.g. from an error path
    /// after a normal finalize) is a no-op.
    pub fn finalize(
        &mut self,
        exit_reason: &str,
        total_iterations: u32,
        successful_invocations: u32,
        failed_invocations: u32,
        backlog: &Backlog,
        stories_passed_at_start: usize,
    ) -> Result<()> {
        if self.summary_written {
            return Ok(());
        }

        let ended_at = Utc::now();
        let (stories_passed, stories_total) = backlog.progress();
        let summary = SessionSummary {
            session_id: self.session_id.clone(),
            started_at: self.started_at,
            ended_at,
            duration_seconds: (ended_at - self.started_at).num_seconds(),
            exit_reason: exit_reason.to_string(),
            total_iterations,
            successful_invocations,
            failed_invocations,
            stories_total,
            stories_passed,
            stories_passed_this_session: stories_passed.saturating_sub(stories_passed_at_start),
            invocations: std::mem::take(&mut self.invocations),
        };

        persist::write_json(&self.dir.join(SUMMARY_FILE), &summary)?;
        self.summary_written = true;

        info!(
            session = %self.session_id,
            reason = exit_reason,
            iterations = total_iterations,
            "session finalized"
        );
        Ok(())
    }
}

/// Find the most recent session directory under `logs_root`.
///
/// Session names embed a sortable timestamp, so the lexicographic maximum is
/// the latest session. Returns `None` when there are no sessions.
pub fn latest_session(logs_root: &Path) -> Result<Option<PathBuf>> {
    if !logs_root.is_dir() {
        return Ok(None);
    }

    let mut latest: Option<(String, PathBuf)> = None;
    for entry in fs::read_dir(logs_root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(SESSION_PREFIX) || !entry.path().is_dir() {
            continue;
        }
        match &latest {
            Some((best, _)) if *best >= name => {}
            _ => latest = Some((name, entry.path())),
        }
    }
    Ok(latest.map(|(_, path)| path))
}

/// Load the resumable state from a session directory, if one was written.
pub fn load_state(session_dir: &Path) -> Result<Option<RunState>> {
    let path = session_dir.join(STATE_FILE);
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(persist::read_json(&path)?))
}
