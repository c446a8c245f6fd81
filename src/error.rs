//! Custom error types for storyloop.
//!
//! This module provides structured error types that enable better
//! error handling, reporting, and recovery throughout the application.
//!
//! Per-invocation problems (timeouts, crashes, malformed agent output) are
//! NOT errors here - they are outcome classifications fed to the circuit
//! breaker so the loop can keep going. Only conditions that must abort the
//! process (load-time schema problems, resume-time state mismatches, internal
//! invariant violations) live in this taxonomy.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for storyloop operations
#[derive(Error, Debug)]
pub enum LoopError {
    /// Backlog file is malformed or missing required fields
    #[error("Backlog schema error in {path}: {message}")]
    Schema { path: PathBuf, message: String },

    /// A story id was referenced that does not exist in the backlog
    #[error("Unknown story id: {id}")]
    UnknownStory { id: String },

    /// Call budget exhausted within the trailing window
    #[error("Call budget exceeded: {used}/{limit} calls in the trailing {window_minutes} minutes")]
    BudgetExceeded {
        used: u32,
        limit: u32,
        window_minutes: i64,
    },

    /// Backlog file changed between runs; resume refuses to guess
    #[error("Backlog fingerprint mismatch: state recorded {expected} but file is {actual} - the backlog was modified since the last snapshot (start a fresh run or reset)")]
    StateMismatch { expected: String, actual: String },

    /// No previous run state was found for --resume
    #[error("No resumable session found under {logs_root}")]
    NothingToResume { logs_root: PathBuf },

    /// The agent binary could not be found or spawned
    #[error("Agent command '{command}' unavailable: {message}")]
    AgentSpawn { command: String, message: String },

    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LoopError {
    /// Create a schema error for a backlog path
    pub fn schema(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Schema {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an unknown-story error
    pub fn unknown_story(id: impl Into<String>) -> Self {
        Self::UnknownStory { id: id.into() }
    }

    /// Create an agent-spawn error
    pub fn agent_spawn(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AgentSpawn {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Check if this error is fatal at startup (run never begins)
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            Self::Schema { .. }
                | Self::StateMismatch { .. }
                | Self::NothingToResume { .. }
                | Self::AgentSpawn { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Schema { .. } => 7,
            Self::StateMismatch { .. } | Self::NothingToResume { .. } => 8,
            Self::AgentSpawn { .. } => 6,
            Self::BudgetExceeded { .. } => 3,
            Self::UnknownStory { .. } => 5,
            _ => 1,
        }
    }
}

/// Type alias for storyloop results
pub type Result<T> = std::result::Result<T, LoopError>;
