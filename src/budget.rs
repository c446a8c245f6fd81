//! Call budget guard: a sliding-window rate limiter for agent invocations.
//!
//! The budget tracks the timestamp of every call made in the trailing
//! 60-minute window. When the window is full the loop terminates with a
//! rate-limited status; it never sleeps waiting for capacity, because an
//! unattended controller blocked for most of an hour is worse than a clean
//! stop the operator can see and act on.
//!
//! Timestamps round-trip through [`RunState`](crate::session::RunState) so a
//! resumed run inherits the in-flight window instead of starting fresh.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use crate::error::{LoopError, Result};

/// Width of the trailing window.
pub const WINDOW_MINUTES: i64 = 60;

/// Sliding-window call counter.
#[derive(Debug, Clone)]
pub struct CallBudget {
    limit: u32,
    calls: VecDeque<DateTime<Utc>>,
}

impl CallBudget {
    /// Create an empty budget with the given per-window limit.
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            calls: VecDeque::new(),
        }
    }

    /// Restore a budget from persisted timestamps (resume path).
    ///
    /// Stale timestamps are kept as-is and pruned lazily on the next check,
    /// so restoring is cheap and order-insensitive.
    #[must_use]
    pub fn from_timestamps(limit: u32, timestamps: Vec<DateTime<Utc>>) -> Self {
        let mut calls: Vec<DateTime<Utc>> = timestamps;
        calls.sort_unstable();
        Self {
            limit,
            calls: calls.into(),
        }
    }

    /// The per-window limit.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Timestamps still inside the window, for persistence.
    #[must_use]
    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.calls.iter().copied().collect()
    }

    /// Drop timestamps older than the window start.
    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::minutes(WINDOW_MINUTES);
        while let Some(first) = self.calls.front() {
            if *first <= cutoff {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    /// Calls remaining in the window ending at `now`.
    pub fn remaining(&mut self, now: DateTime<Utc>) -> u32 {
        self.prune(now);
        self.limit.saturating_sub(self.calls.len() as u32)
    }

    /// Check capacity for one more call without recording it.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::BudgetExceeded`] when the window is full.
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.prune(now);
        if self.calls.len() as u32 >= self.limit {
            return Err(LoopError::BudgetExceeded {
                used: self.calls.len() as u32,
                limit: self.limit,
                window_minutes: WINDOW_MINUTES,
            });
        }
        Ok(())
    }

    /// Record a call made at `at`.
    ///
    /// Recorded at invocation start, so a call that later times out or
    /// crashes still counts against the budget.
    pub fn record_call(&mut self, at: DateTime<Utc>) {
        self.calls.push_back(at);
    }
}
