//! The implementation loop: iteration state machine and controller.

pub mod controller;
pub mod state;

pub use controller::{LoopController, RunReport};
pub use state::{LoopPhase, TerminationReason};
