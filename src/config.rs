//! Runtime configuration for the implementation loop.
//!
//! The resolved configuration is snapshotted into the session directory at
//! start so every run is reproducible from its logs alone.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default maximum loop iterations per run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 50;
/// Default per-call idle-output timeout in minutes.
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 15;
/// Default call budget within the trailing 60-minute window.
pub const DEFAULT_MAX_CALLS_PER_HOUR: u32 = 100;
/// Default consecutive-failure threshold before tripping.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;
/// Default no-progress threshold before tripping.
pub const DEFAULT_NO_PROGRESS_THRESHOLD: u32 = 3;

/// Resolved runtime configuration for one loop run.
///
/// # Example
///
/// ```
/// use storyloop::config::RunConfig;
///
/// let config = RunConfig::default().with_max_iterations(10);
/// assert_eq!(config.max_iterations, 10);
/// assert_eq!(config.max_calls_per_hour, 100);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    /// Path to the backlog file.
    pub backlog_path: PathBuf,
    /// Root directory for session logs.
    pub logs_root: PathBuf,
    /// Maximum loop iterations before terminating with `max_iterations`.
    pub max_iterations: u32,
    /// Per-call timeout: kill the agent if no output arrives for this long.
    pub timeout_minutes: u64,
    /// Call budget within the trailing 60-minute window.
    pub max_calls_per_hour: u32,
    /// Consecutive failed invocations (crash/timeout/malformed) before tripping.
    pub max_consecutive_failures: u32,
    /// Consecutive completed invocations without progress before tripping.
    pub no_progress_threshold: u32,
    /// Agent model name passed through to the agent CLI.
    pub model: String,
    /// Pause between iterations in seconds (0 in tests).
    pub iteration_pause_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            backlog_path: PathBuf::from("backlog.json"),
            logs_root: PathBuf::from(".storyloop/logs"),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            max_calls_per_hour: DEFAULT_MAX_CALLS_PER_HOUR,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            no_progress_threshold: DEFAULT_NO_PROGRESS_THRESHOLD,
            model: "sonnet".to_string(),
            iteration_pause_secs: 2,
        }
    }
}

impl RunConfig {
    /// Set the backlog path.
    #[must_use]
    pub fn with_backlog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.backlog_path = path.into();
        self
    }

    /// Set the session logs root.
    #[must_use]
    pub fn with_logs_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.logs_root = path.into();
        self
    }

    /// Set the maximum iterations.
    #[must_use]
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set the per-call idle timeout in minutes.
    #[must_use]
    pub fn with_timeout_minutes(mut self, minutes: u64) -> Self {
        self.timeout_minutes = minutes;
        self
    }

    /// Set the trailing-window call budget.
    #[must_use]
    pub fn with_max_calls_per_hour(mut self, limit: u32) -> Self {
        self.max_calls_per_hour = limit;
        self
    }

    /// Set the consecutive-failure threshold.
    #[must_use]
    pub fn with_max_consecutive_failures(mut self, threshold: u32) -> Self {
        self.max_consecutive_failures = threshold;
        self
    }

    /// Set the no-progress threshold.
    #[must_use]
    pub fn with_no_progress_threshold(mut self, threshold: u32) -> Self {
        self.no_progress_threshold = threshold;
        self
    }

    /// Set the agent model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the pause between iterations.
    #[must_use]
    pub fn with_iteration_pause_secs(mut self, secs: u64) -> Self {
        self.iteration_pause_secs = secs;
        self
    }

    /// Per-call timeout as a [`std::time::Duration`].
    #[must_use]
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_minutes * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = RunConfig::default();
        assert_eq!(config.max_iterations, 50);
        assert_eq!(config.timeout_minutes, 15);
        assert_eq!(config.max_calls_per_hour, 100);
        assert_eq!(config.max_consecutive_failures, 3);
        assert_eq!(config.no_progress_threshold, 3);
        assert_eq!(config.model, "sonnet");
    }

    #[test]
    fn test_builder_setters() {
        let config = RunConfig::default()
            .with_max_iterations(5)
            .with_timeout_minutes(1)
            .with_max_calls_per_hour(10)
            .with_no_progress_threshold(2)
            .with_max_consecutive_failures(4)
            .with_model("opus")
            .with_iteration_pause_secs(0);

        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.timeout(), std::time::Duration::from_secs(60));
        assert_eq!(config.max_calls_per_hour, 10);
        assert_eq!(config.no_progress_threshold, 2);
        assert_eq!(config.max_consecutive_failures, 4);
        assert_eq!(config.model, "opus");
        assert_eq!(config.iteration_pause_secs, 0);
    }

    #[test]
    fn test_config_serializes_for_snapshot() {
        let config = RunConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("max_calls_per_hour"));

        let back: RunConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
