//! Storyloop - autonomous implementation loop.
//!
//! Drives an external coding agent through a user-story backlog one story
//! per invocation, with a resumable on-disk state, a sliding-window call
//! budget, a two-counter circuit breaker, per-call idle timeouts, and full
//! session recording.
//!
//! # Architecture
//!
//! - [`backlog`] - the story backlog: durable source of truth
//! - [`budget`] - sliding-window call budget
//! - [`breaker`] - circuit breaker (failures and stalls)
//! - [`agent`] - agent process driver behind a mockable trait
//! - [`outcome`] - status-block extraction from transcripts
//! - [`prompt`] - per-story prompt rendering
//! - [`session`] - session directories, run state, summaries
//! - [`r#loop`] - the iteration state machine and controller
//! - [`testing`] - scripted agent double for tests
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use storyloop::agent::ClaudeCli;
//! use storyloop::config::RunConfig;
//! use storyloop::r#loop::LoopController;
//!
//! let config = RunConfig::default().with_max_iterations(10);
//! let agent = Arc::new(ClaudeCli::new(".", config.model.clone()));
//! let report = LoopController::new(config, agent).run().await?;
//! println!("finished: {}", report.reason);
//! ```

pub mod agent;
pub mod backlog;
pub mod breaker;
pub mod budget;
pub mod config;
pub mod error;
pub mod r#loop;
pub mod outcome;
pub mod persist;
pub mod prompt;
pub mod session;
pub mod shutdown;
pub mod testing;

// Re-export commonly used types
pub use error::{LoopError, Result};

pub use agent::{AgentInvocation, AgentProcess, ClaudeCli, InvocationOutcome};
pub use backlog::{Backlog, Story};
pub use breaker::{CircuitBreaker, TripReason};
pub use budget::CallBudget;
pub use config::RunConfig;
pub use outcome::{extract, AgentStatus, Extraction, Outcome, StatusReport};
pub use r#loop::{LoopController, RunReport, TerminationReason};
pub use session::{RunState, SessionRecorder, SessionSummary};
pub use shutdown::Shutdown;
