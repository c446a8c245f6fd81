//! Loop phases and termination reasons.

use serde::{Deserialize, Serialize};

/// Where the controller is within one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    /// Choosing the next eligible story.
    Selecting,
    /// The agent process is running.
    Invoking,
    /// Parsing the transcript for a status block.
    Extracting,
    /// Applying the outcome to the backlog and run state.
    Updating,
    /// Choosing whether to continue or terminate.
    Deciding,
}

/// Why a run ended. Every run ends with exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Every story in the backlog passes.
    AllComplete,
    /// The agent signaled that continuing is pointless, or emitted the
    /// global completion marker.
    AgentSignaledDone,
    /// The sliding-window call budget was exhausted.
    RateLimited,
    /// Too many consecutive failed invocations.
    CircuitBreakerFailures,
    /// Too many consecutive invocations without progress.
    CircuitBreakerStall,
    /// The iteration cap was reached.
    MaxIterations,
    /// SIGINT/SIGTERM was received.
    Interrupted,
}

impl TerminationReason {
    /// Stable snake_case string used in summaries and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AllComplete => "all_complete",
            Self::AgentSignaledDone => "agent_signaled_done",
            Self::RateLimited => "rate_limited",
            Self::CircuitBreakerFailures => "circuit_breaker_failures",
            Self::CircuitBreakerStall => "circuit_breaker_stall",
            Self::MaxIterations => "max_iterations",
            Self::Interrupted => "interrupted",
        }
    }

    /// Process exit code for this reason.
    ///
    /// Success (0) is reserved for the two outcomes where stopping was the
    /// right thing to do; everything else is distinguishable in scripts.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::AllComplete | Self::AgentSignaledDone => 0,
            Self::CircuitBreakerFailures | Self::CircuitBreakerStall => 2,
            Self::RateLimited => 3,
            Self::MaxIterations => 4,
            Self::Interrupted => 130,
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_strings_are_snake_case() {
        assert_eq!(TerminationReason::AllComplete.as_str(), "all_complete");
        assert_eq!(
            TerminationReason::CircuitBreakerStall.as_str(),
            "circuit_breaker_stall"
        );
        assert_eq!(TerminationReason::Interrupted.to_string(), "interrupted");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(TerminationReason::AllComplete.exit_code(), 0);
        assert_eq!(TerminationReason::AgentSignaledDone.exit_code(), 0);
        assert_eq!(TerminationReason::CircuitBreakerFailures.exit_code(), 2);
        assert_eq!(TerminationReason::RateLimited.exit_code(), 3);
        assert_eq!(TerminationReason::MaxIterations.exit_code(), 4);
        assert_eq!(TerminationReason::Interrupted.exit_code(), 130);
    }

    #[test]
    fn test_reason_serde_roundtrip() {
        let json = serde_json::to_string(&TerminationReason::RateLimited).unwrap();
        assert_eq!(json, "\"rate_limited\"");
        let back: TerminationReason = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TerminationReason::RateLimited);
    }
}
