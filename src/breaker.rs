//! Circuit breaker: stops the loop when the agent is failing or spinning.
//!
//! Two independent counters:
//! - consecutive failures: crashed, timed-out, or malformed invocations
//! - consecutive no-progress: invocations that completed cleanly but did
//!   not flip any story to passing
//!
//! A failed invocation says nothing about progress, so it leaves the
//! no-progress counter untouched. A completed invocation resets the failure
//! counter regardless of whether it progressed.

use serde::{Deserialize, Serialize};

/// Why the breaker tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripReason {
    /// Too many consecutive failed invocations.
    Failures,
    /// Too many consecutive completed invocations without progress.
    Stall,
}

/// Tracks consecutive failures and consecutive no-progress invocations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreaker {
    consecutive_failures: u32,
    consecutive_no_progress: u32,
    max_consecutive_failures: u32,
    no_progress_threshold: u32,
    /// Human-readable reason for the most recent failure, for the summary.
    last_failure_reason: Option<String>,
}

impl CircuitBreaker {
    /// Create a breaker with both counters at zero.
    #[must_use]
    pub fn new(max_consecutive_failures: u32, no_progress_threshold: u32) -> Self {
        Self {
            consecutive_failures: 0,
            consecutive_no_progress: 0,
            max_consecutive_failures,
            no_progress_threshold,
            last_failure_reason: None,
        }
    }

    /// Restore counters from persisted run state.
    #[must_use]
    pub fn from_counts(
        max_consecutive_failures: u32,
        no_progress_threshold: u32,
        consecutive_failures: u32,
        consecutive_no_progress: u32,
    ) -> Self {
        Self {
            consecutive_failures,
            consecutive_no_progress,
            max_consecutive_failures,
            no_progress_threshold,
            last_failure_reason: None,
        }
    }

    /// Record a failed invocation (crash, timeout, or malformed output).
    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.consecutive_failures += 1;
        self.last_failure_reason = Some(reason.into());
    }

    /// Record a completed invocation; `progressed` is whether a story flipped
    /// to passing.
    pub fn record_completed(&mut self, progressed: bool) {
        self.consecutive_failures = 0;
        self.last_failure_reason = None;
        if progressed {
            self.consecutive_no_progress = 0;
        } else {
            self.consecutive_no_progress += 1;
        }
    }

    /// Whether either counter has reached its threshold. Failures win when
    /// both have.
    #[must_use]
    pub fn tripped(&self) -> Option<TripReason> {
        if self.consecutive_failures >= self.max_consecutive_failures {
            Some(TripReason::Failures)
        } else if self.consecutive_no_progress >= self.no_progress_threshold {
            Some(TripReason::Stall)
        } else {
            None
        }
    }

    /// Current consecutive-failure count.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Current consecutive no-progress count.
    #[must_use]
    pub fn consecutive_no_progress(&self) -> u32 {
        self.consecutive_no_progress
    }

    /// Reason recorded with the most recent failure, if any.
    #[must_use]
    pub fn last_failure_reason(&self) -> Option<&str> {
        self.last_failure_reason.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_breaker_not_tripped() {
        let breaker = CircuitBreaker::new(3, 3);
        assert_eq!(breaker.tripped(), None);
    }

    #[test]
    fn test_trips_at_exact_failure_threshold() {
        let mut breaker = CircuitBreaker::new(3, 3);
        breaker.record_failure("timeout");
        breaker.record_failure("timeout");
        assert_eq!(breaker.tripped(), None);

        breaker.record_failure("crash");
        assert_eq!(breaker.tripped(), Some(TripReason::Failures));
        assert_eq!(breaker.last_failure_reason(), Some("crash"));
    }

    #[test]
    fn test_trips_at_exact_stall_threshold() {
        let mut breaker = CircuitBreaker::new(3, 2);
        breaker.record_completed(false);
        assert_eq!(breaker.tripped(), None);

        breaker.record_completed(false);
        assert_eq!(breaker.tripped(), Some(TripReason::Stall));
    }

    #[test]
    fn test_completed_resets_failures() {
        let mut breaker = CircuitBreaker::new(3, 5);
        breaker.record_failure("timeout");
        breaker.record_failure("timeout");
        breaker.record_completed(false);

        assert_eq!(breaker.consecutive_failures(), 0);
        assert_eq!(breaker.consecutive_no_progress(), 1);
        assert_eq!(breaker.tripped(), None);
    }

    #[test]
    fn test_progress_resets_no_progress() {
        let mut breaker = CircuitBreaker::new(3, 3);
        breaker.record_completed(false);
        breaker.record_completed(false);
        breaker.record_completed(true);
        assert_eq!(breaker.consecutive_no_progress(), 0);
    }

    #[test]
    fn test_failure_leaves_no_progress_untouched() {
        let mut breaker = CircuitBreaker::new(5, 3);
        breaker.record_completed(false);
        breaker.record_completed(false);
        breaker.record_failure("malformed");

        assert_eq!(breaker.consecutive_no_progress(), 2);
        assert_eq!(breaker.consecutive_failures(), 1);
    }

    #[test]
    fn test_failures_reported_before_stall() {
        let mut breaker = CircuitBreaker::from_counts(2, 2, 2, 2);
        assert_eq!(breaker.tripped(), Some(TripReason::Failures));
        breaker.record_completed(false);
        assert_eq!(breaker.tripped(), Some(TripReason::Stall));
    }

    #[test]
    fn test_from_counts_restores_state() {
        let breaker = CircuitBreaker::from_counts(3, 3, 2, 1);
        assert_eq!(breaker.consecutive_failures(), 2);
        assert_eq!(breaker.consecutive_no_progress(), 1);
        assert_eq!(breaker.tripped(), None);
    }
}
