//! The loop controller: drives the agent through the backlog until a
//! termination condition fires.
//!
//! # Iteration state machine
//!
//! ```text
//! SELECTING ──► INVOKING ──► EXTRACTING ──► UPDATING ──► DECIDING
//!     ▲                                                      │
//!     └──────────────────────────────────────────────────────┘
//! ```
//!
//! Every iteration ends with the backlog and run state persisted, so a kill
//! at any point loses at most the in-flight invocation.
//!
//! # Dependency injection
//!
//! The agent is an `Arc<dyn AgentProcess>`, so the whole loop runs against a
//! scripted fake in tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::agent::{AgentProcess, InvocationOutcome};
use crate::backlog::Backlog;
use crate::breaker::{CircuitBreaker, TripReason};
use crate::budget::CallBudget;
use crate::config::RunConfig;
use crate::error::{LoopError, Result};
use crate::outcome::{extract, AgentStatus, Extraction};
use crate::prompt::render_story_prompt;
use crate::session::{
    latest_session, load_state, InvocationRecord, RunState, SessionRecorder,
};
use crate::shutdown::Shutdown;
use crate::r#loop::TerminationReason;

/// What a finished run looked like.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub reason: TerminationReason,
    pub session_id: String,
    pub iterations: u32,
    pub successful_invocations: u32,
    pub failed_invocations: u32,
    pub stories_passed: usize,
    pub stories_total: usize,
}

/// Counters threaded through the loop and persisted after every iteration.
struct Counters {
    iteration: u32,
    successful: u32,
    failed: u32,
}

/// Drives the implementation loop for one run.
pub struct LoopController {
    config: RunConfig,
    agent: Arc<dyn AgentProcess>,
    shutdown: Shutdown,
}

impl LoopController {
    /// Create a controller over the given agent.
    #[must_use]
    pub fn new(config: RunConfig, agent: Arc<dyn AgentProcess>) -> Self {
        Self {
            config,
            agent,
            shutdown: Shutdown::new(),
        }
    }

    /// Use an externally-installed shutdown handle.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Run from scratch.
    pub async fn run(&self) -> Result<RunReport> {
        self.run_inner(None).await
    }

    /// Resume the most recent session under the logs root.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::NothingToResume`] when no session with saved
    /// state exists, and [`LoopError::StateMismatch`] when the backlog file
    /// changed since the state was written.
    pub async fn resume(&self) -> Result<RunReport> {
        let session_dir = latest_session(&self.config.logs_root)?.ok_or_else(|| {
            LoopError::NothingToResume {
                logs_root: self.config.logs_root.clone(),
            }
        })?;
        let state = load_state(&session_dir)?.ok_or_else(|| LoopError::NothingToResume {
            logs_root: self.config.logs_root.clone(),
        })?;

        let actual = Backlog::fingerprint(&self.config.backlog_path)?;
        if state.backlog_fingerprint != actual {
            return Err(LoopError::StateMismatch {
                expected: state.backlog_fingerprint,
                actual,
            });
        }

        info!(
            resumed_from = %state.session_id,
            iteration = state.iteration,
            "resuming previous run"
        );
        self.run_inner(Some(state)).await
    }

    async fn run_inner(&self, prior: Option<RunState>) -> Result<RunReport> {
        let mut backlog = Backlog::load(&self.config.backlog_path)?;
        let mut recorder = SessionRecorder::create(&self.config.logs_root)?;
        recorder.write_config_snapshot(&self.config)?;
        recorder.write_backlog_snapshot(&backlog)?;

        let (passed_at_start, _) = backlog.progress();

        let mut budget = match &prior {
            Some(state) => CallBudget::from_timestamps(
                self.config.max_calls_per_hour,
                state.call_timestamps.clone(),
            ),
            None => CallBudget::new(self.config.max_calls_per_hour),
        };
        let mut breaker = match &prior {
            Some(state) => CircuitBreaker::from_counts(
                self.config.max_consecutive_failures,
                self.config.no_progress_threshold,
                state.consecutive_failures,
                state.consecutive_no_progress,
            ),
            None => CircuitBreaker::new(
                self.config.max_consecutive_failures,
                self.config.no_progress_threshold,
            ),
        };
        let mut counters = Counters {
            iteration: prior.as_ref().map_or(0, |s| s.iteration),
            successful: prior.as_ref().map_or(0, |s| s.successful_invocations),
            failed: prior.as_ref().map_or(0, |s| s.failed_invocations),
        };

        let outcome = self
            .drive(
                &mut backlog,
                &mut recorder,
                &mut budget,
                &mut breaker,
                &mut counters,
            )
            .await;

        // The summary is written whatever happened; a failed drive still
        // leaves a readable record of how far the run got.
        let exit_reason = match &outcome {
            Ok(reason) => reason.as_str().to_string(),
            Err(e) => format!("error: {e}"),
        };
        let finalize_result = recorder.finalize(
            &exit_reason,
            counters.iteration,
            counters.successful,
            counters.failed,
            &backlog,
            passed_at_start,
        );

        let reason = outcome?;
        finalize_result?;

        let (stories_passed, stories_total) = backlog.progress();
        Ok(RunReport {
            reason,
            session_id: recorder.session_id().to_string(),
            iterations: counters.iteration,
            successful_invocations: counters.successful,
            failed_invocations: counters.failed,
            stories_passed,
            stories_total,
        })
    }

    async fn drive(
        &self,
        backlog: &mut Backlog,
        recorder: &mut SessionRecorder,
        budget: &mut CallBudget,
        breaker: &mut CircuitBreaker,
        counters: &mut Counters,
    ) -> Result<TerminationReason> {
        // A resumed run may already be at a terminal condition.
        if let Some(reason) = Self::pre_iteration_check(backlog, breaker, counters, &self.config) {
            return Ok(reason);
        }

        loop {
            if self.shutdown.is_requested() {
                return Ok(TerminationReason::Interrupted);
            }

            // SELECTING
            let Some(story) = backlog.next_eligible_story().cloned() else {
                return Ok(TerminationReason::AllComplete);
            };

            if budget.try_acquire(Utc::now()).is_err() {
                warn!(
                    limit = budget.limit(),
                    "call budget exhausted, stopping so the operator can decide"
                );
                return Ok(TerminationReason::RateLimited);
            }

            counters.iteration += 1;
            let iteration = counters.iteration;
            // Counted at start: a call that times out or crashes still spent
            // an invocation.
            budget.record_call(Utc::now());

            let remaining = budget.remaining(Utc::now());
            info!(
                iteration,
                story = %story.id,
                title = %story.title,
                budget_remaining = remaining,
                "starting iteration"
            );

            // INVOKING
            let prompt = render_story_prompt(backlog, &story, &self.config.backlog_path);
            let transcript_path = recorder.transcript_path(iteration);
            let invocation = tokio::select! {
                result = self.agent.invoke(&prompt, self.config.timeout(), &transcript_path) => result?,
                () = self.shutdown.requested() => {
                    // Dropping the invoke future kills the child process.
                    return Ok(TerminationReason::Interrupted);
                }
            };

            // EXTRACTING
            let outcome = extract(&invocation.transcript);
            debug!(
                outcome = ?invocation.outcome,
                extraction = ?outcome.extraction,
                "invocation finished"
            );

            // UPDATING
            let mut record = InvocationRecord {
                iteration,
                story_id: story.id.clone(),
                started_at: invocation.started_at,
                ended_at: invocation.ended_at,
                outcome: invocation.outcome,
                story_passed: None,
                files_modified: Vec::new(),
                exit_signal: false,
                transcript_file: format!("iteration_{iteration:03}.log"),
                note: None,
            };
            let mut exit_signal = false;

            match invocation.outcome {
                InvocationOutcome::Timeout => {
                    counters.failed += 1;
                    breaker.record_failure("invocation timed out");
                    record.note = Some("killed after idle-output timeout".to_string());
                }
                InvocationOutcome::Crashed => {
                    counters.failed += 1;
                    let detail = format!(
                        "agent exited with code {:?}: {}",
                        invocation.exit_code,
                        tail(&invocation.stderr, 400)
                    );
                    breaker.record_failure(detail.clone());
                    record.note = Some(detail);
                }
                InvocationOutcome::Completed => match outcome.extraction {
                    Extraction::Status(report) => {
                        counters.successful += 1;
                        exit_signal = report.exit_signal;
                        record.exit_signal = report.exit_signal;

                        if report.story_id != story.id {
                            // The agent reported some other story. The result
                            // is not trustworthy, so the target story is
                            // marked unprogressed instead.
                            warn!(
                                expected = %story.id,
                                reported = %report.story_id,
                                "status block names the wrong story, rejecting result"
                            );
                            let note = format!(
                                "agent reported status for {} while working on {}",
                                report.story_id, story.id
                            );
                            backlog.mark_story_result(&story.id, false, &note, &[])?;
                            breaker.record_completed(false);
                            record.note = Some(note);
                        } else {
                            let progressed = report.story_passed && !story.passes;
                            let note = match report.status {
                                AgentStatus::Failed => "agent reported FAILED",
                                AgentStatus::InProgress if !report.story_passed => {
                                    "agent reported IN_PROGRESS"
                                }
                                _ => "",
                            };
                            backlog.mark_story_result(
                                &story.id,
                                report.story_passed,
                                note,
                                &report.files_modified,
                            )?;
                            breaker.record_completed(progressed);
                            record.story_passed = Some(report.story_passed);
                            record.files_modified = report.files_modified;

                            if progressed {
                                let (passed, total) = backlog.progress();
                                info!(story = %story.id, passed, total, "story passed");
                            }
                        }
                    }
                    Extraction::Malformed { detail } => {
                        counters.failed += 1;
                        warn!(%detail, "malformed status block");
                        breaker.record_failure(format!("malformed status block: {detail}"));
                        record.note = Some(detail);
                    }
                    Extraction::NoStatusReported => {
                        counters.failed += 1;
                        warn!("transcript contains no status block");
                        breaker.record_failure("no status block in transcript");
                        record.note = Some("no status block in transcript".to_string());
                    }
                },
            }

            backlog.save(&self.config.backlog_path)?;
            recorder.record_invocation(record);
            recorder.write_state(&RunState {
                session_id: recorder.session_id().to_string(),
                iteration,
                successful_invocations: counters.successful,
                failed_invocations: counters.failed,
                consecutive_failures: breaker.consecutive_failures(),
                consecutive_no_progress: breaker.consecutive_no_progress(),
                call_timestamps: budget.timestamps(),
                current_story_id: Some(story.id.clone()),
                backlog_fingerprint: Backlog::fingerprint(&self.config.backlog_path)?,
            })?;

            // DECIDING: exit signal, then global marker, then breaker, then
            // the iteration cap. A fully-passed backlog falls through to the
            // next SELECTING, which finds no eligible story.
            if exit_signal {
                info!("agent set EXIT_SIGNAL, stopping");
                return Ok(TerminationReason::AgentSignaledDone);
            }
            // The global marker claims the whole backlog is done, even when
            // some stories are still flagged open on disk.
            if outcome.completion_marker {
                info!("agent emitted the global completion marker, stopping");
                return Ok(TerminationReason::AllComplete);
            }
            match breaker.tripped() {
                Some(TripReason::Failures) => {
                    warn!(
                        reason = breaker.last_failure_reason().unwrap_or("unknown"),
                        "circuit breaker tripped on consecutive failures"
                    );
                    return Ok(TerminationReason::CircuitBreakerFailures);
                }
                Some(TripReason::Stall) => {
                    warn!("circuit breaker tripped on no progress");
                    return Ok(TerminationReason::CircuitBreakerStall);
                }
                None => {}
            }
            if iteration >= self.config.max_iterations {
                return Ok(TerminationReason::MaxIterations);
            }

            if self.config.iteration_pause_secs > 0 {
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_secs(self.config.iteration_pause_secs)) => {}
                    () = self.shutdown.requested() => {
                        return Ok(TerminationReason::Interrupted);
                    }
                }
            }
        }
    }

    /// Terminal conditions a resumed run may start in.
    fn pre_iteration_check(
        backlog: &Backlog,
        breaker: &CircuitBreaker,
        counters: &Counters,
        config: &RunConfig,
    ) -> Option<TerminationReason> {
        if backlog.is_complete() {
            return Some(TerminationReason::AllComplete);
        }
        match breaker.tripped() {
            Some(TripReason::Failures) => return Some(TerminationReason::CircuitBreakerFailures),
            Some(TripReason::Stall) => return Some(TerminationReason::CircuitBreakerStall),
            None => {}
        }
        if counters.iteration >= config.max_iterations {
            return Some(TerminationReason::MaxIterations);
        }
        None
    }
}

fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text.trim_end();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].trim_end()
}
