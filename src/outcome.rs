//! Outcome extraction: parse the structured status block from an agent
//! transcript.
//!
//! The agent is asked to end its output with a delimited block of KEY: value
//! lines. Extraction is total - any transcript maps to exactly one
//! [`Extraction`] variant, and a parse problem is a classification
//! (`Malformed`), never an error.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Opening delimiter of the status block.
pub const STATUS_BEGIN: &str = "---STORYLOOP_STATUS---";
/// Closing delimiter of the status block.
pub const STATUS_END: &str = "---END_STORYLOOP_STATUS---";
/// Free-standing marker the agent emits when it believes all work is done.
pub const COMPLETION_MARKER: &str = "<promise>COMPLETE</promise>";

/// Self-reported status of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Complete,
    InProgress,
    Failed,
}

impl AgentStatus {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "COMPLETE" => Some(Self::Complete),
            "IN_PROGRESS" => Some(Self::InProgress),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// The parsed contents of a well-formed status block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: AgentStatus,
    pub story_id: String,
    pub story_passed: bool,
    #[serde(default)]
    pub files_modified: Vec<String>,
    pub exit_signal: bool,
}

/// Classification of a transcript's status block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Extraction {
    /// A well-formed block was found; later blocks shadow earlier ones.
    Status(StatusReport),
    /// A block was attempted but is unparseable (unterminated, missing or
    /// invalid required fields).
    Malformed { detail: String },
    /// No status block at all.
    NoStatusReported,
}

impl Extraction {
    /// Whether this extraction counts as a failure for the circuit breaker.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Status(_))
    }
}

/// Everything the controller needs to know about one transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub extraction: Extraction,
    /// Whether the free-standing completion marker appeared anywhere.
    pub completion_marker: bool,
}

/// Parse a transcript into an [`Outcome`]. Total: never fails.
#[must_use]
pub fn extract(transcript: &str) -> Outcome {
    Outcome {
        extraction: extract_status(transcript),
        completion_marker: transcript.contains(COMPLETION_MARKER),
    }
}

fn extract_status(transcript: &str) -> Extraction {
    // Dotall so the block body may span lines; the last match wins because
    // the agent sometimes quotes the required format before emitting it.
    static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(&format!(
            "(?s){}(.*?){}",
            regex::escape(STATUS_BEGIN),
            regex::escape(STATUS_END)
        ))
        .expect("valid literal pattern")
    });

    let last_block = BLOCK_RE
        .captures_iter(transcript)
        .last()
        .map(|c| c[1].to_string());

    match last_block {
        Some(body) => parse_block(&body),
        None if transcript.contains(STATUS_BEGIN) => Extraction::Malformed {
            detail: "status block opened but never closed".to_string(),
        },
        None => Extraction::NoStatusReported,
    }
}

fn parse_block(body: &str) -> Extraction {
    let mut status = None;
    let mut story_id = None;
    let mut story_passed = None;
    let mut files_modified = Vec::new();
    let mut exit_signal = None;

    for line in body.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_uppercase().as_str() {
            "STATUS" => match AgentStatus::parse(value) {
                Some(s) => status = Some(s),
                None => {
                    return Extraction::Malformed {
                        detail: format!("unrecognized STATUS value: {value:?}"),
                    }
                }
            },
            "STORY_ID" => story_id = Some(value.to_string()),
            "STORY_PASSED" => match parse_bool(value) {
                Some(b) => story_passed = Some(b),
                None => {
                    return Extraction::Malformed {
                        detail: format!("STORY_PASSED must be true or false, got {value:?}"),
                    }
                }
            },
            "FILES_MODIFIED" => files_modified = parse_files(value),
            "EXIT_SIGNAL" => match parse_bool(value) {
                Some(b) => exit_signal = Some(b),
                None => {
                    return Extraction::Malformed {
                        detail: format!("EXIT_SIGNAL must be true or false, got {value:?}"),
                    }
                }
            },
            _ => {}
        }
    }

    match (status, story_id, story_passed, exit_signal) {
        (Some(status), Some(story_id), Some(story_passed), Some(exit_signal)) => {
            Extraction::Status(StatusReport {
                status,
                story_id,
                story_passed,
                files_modified,
                exit_signal,
            })
        }
        (status, story_id, story_passed, exit_signal) => {
            let mut missing = Vec::new();
            if status.is_none() {
                missing.push("STATUS");
            }
            if story_id.is_none() {
                missing.push("STORY_ID");
            }
            if story_passed.is_none() {
                missing.push("STORY_PASSED");
            }
            if exit_signal.is_none() {
                missing.push("EXIT_SIGNAL");
            }
            Extraction::Malformed {
                detail: format!("missing required fields: {}", missing.join(", ")),
            }
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// FILES_MODIFIED accepts a JSON array or a comma-separated list.
fn parse_files(value: &str) -> Vec<String> {
    if let Ok(list) = serde_json::from_str::<Vec<String>>(value) {
        return list;
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
