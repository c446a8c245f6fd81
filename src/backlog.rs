//! Backlog model: the durable, cross-run source of truth.
//!
//! A [`Backlog`] is an ordered list of [`Story`] items plus run-level
//! metadata, persisted as JSON. The wire format round-trips losslessly:
//! camelCase field names (`branchName`, `userStories`, `acceptanceCriteria`,
//! `testPlan`) are preserved via serde renames.
//!
//! Invariants:
//! - story ids are unique and immutable once assigned
//! - `passes` transitions false -> true exactly once and never reverts
//!   automatically (only an explicit user reset clears it)

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{LoopError, Result};
use crate::persist;

/// One unit of work with acceptance criteria and a pass/fail state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Story {
    /// Stable identifier, unique within a backlog (e.g. "US-001").
    pub id: String,
    /// Short human-readable title.
    pub title: String,
    /// Free-text description of the work.
    pub description: String,
    /// Ordered acceptance criteria.
    #[serde(rename = "acceptanceCriteria")]
    pub acceptance_criteria: Vec<String>,
    /// Integer priority; lower is implemented sooner.
    pub priority: i64,
    /// Whether the story has been implemented and verified.
    pub passes: bool,
    /// Free-text notes accumulated across invocations.
    #[serde(default)]
    pub notes: String,
    /// Optional test-plan description.
    #[serde(rename = "testPlan", default, skip_serializing_if = "Option::is_none")]
    pub test_plan: Option<String>,
    /// Set when `passes` first becomes true; absent before then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Story {
    /// Create a pending story with the given id, title, and priority.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, priority: i64) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            acceptance_criteria: Vec::new(),
            priority,
            passes: false,
            notes: String::new(),
            test_plan: None,
            completed_at: None,
        }
    }
}

/// The ordered set of stories and run metadata, persisted as the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Backlog {
    /// Project identifier.
    pub project: String,
    /// Branch or label the work targets.
    #[serde(rename = "branchName")]
    pub branch_name: String,
    /// Human-readable description of the backlog.
    pub description: String,
    /// Reference to the originating spec document.
    #[serde(default)]
    pub source_spec: String,
    /// When the backlog was created.
    pub created_at: DateTime<Utc>,
    /// When the backlog was last updated.
    pub updated_at: DateTime<Utc>,
    /// The ordered stories.
    #[serde(rename = "userStories")]
    pub user_stories: Vec<Story>,
}

impl Backlog {
    /// Create an empty backlog for a project.
    #[must_use]
    pub fn new(project: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            project: project.into(),
            branch_name: String::new(),
            description: description.into(),
            source_spec: String::new(),
            created_at: now,
            updated_at: now,
            user_stories: Vec::new(),
        }
    }

    /// Load a backlog from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::Schema`] if the file is unreadable, is not valid
    /// JSON, or is missing required fields (including a non-boolean `passes`).
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| LoopError::schema(path, format!("cannot read file: {e}")))?;
        serde_json::from_str(&contents).map_err(|e| LoopError::schema(path, e.to_string()))
    }

    /// Save the backlog atomically (write-temp + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        persist::write_json(path, self)
    }

    /// SHA-256 fingerprint (hex) of the backlog file bytes.
    ///
    /// Used to detect hand-edits between a RunState snapshot and a resume.
    pub fn fingerprint(path: &Path) -> Result<String> {
        let bytes = fs::read(path)?;
        let digest = Sha256::digest(&bytes);
        Ok(hex::encode(digest))
    }

    /// The next story to attempt: lowest priority with `passes == false`,
    /// ties broken by original list order. `None` when all stories pass.
    #[must_use]
    pub fn next_eligible_story(&self) -> Option<&Story> {
        let mut best: Option<&Story> = None;
        for story in self.user_stories.iter().filter(|s| !s.passes) {
            match best {
                // Strict comparison keeps the earliest story on ties.
                Some(b) if story.priority >= b.priority => {}
                _ => best = Some(story),
            }
        }
        best
    }

    /// Look up a story by id.
    #[must_use]
    pub fn story(&self, id: &str) -> Option<&Story> {
        self.user_stories.iter().find(|s| s.id == id)
    }

    /// Apply an invocation outcome to a story.
    ///
    /// When `passed` is true the story flips to passing and `completed_at` is
    /// stamped (a story that already passes is left untouched). Otherwise
    /// `passes` stays false. In both cases non-empty `notes` are appended, and
    /// modified files are recorded as a note line.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::UnknownStory`] if `id` is not in the backlog.
    pub fn mark_story_result(
        &mut self,
        id: &str,
        passed: bool,
        notes: &str,
        files_modified: &[String],
    ) -> Result<()> {
        let story = self
            .user_stories
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| LoopError::unknown_story(id))?;

        if passed && !story.passes {
            story.passes = true;
            story.completed_at = Some(Utc::now());
        }

        if !notes.is_empty() {
            if !story.notes.is_empty() {
                story.notes.push('\n');
            }
            story.notes.push_str(notes);
        }
        if !files_modified.is_empty() {
            if !story.notes.is_empty() {
                story.notes.push('\n');
            }
            story.notes.push_str("files: ");
            story.notes.push_str(&files_modified.join(", "));
        }

        self.updated_at = Utc::now();
        Ok(())
    }

    /// Progress as (passed, total).
    #[must_use]
    pub fn progress(&self) -> (usize, usize) {
        let passed = self.user_stories.iter().filter(|s| s.passes).count();
        (passed, self.user_stories.len())
    }

    /// True when every story passes.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.user_stories.iter().all(|s| s.passes)
    }

    /// Clear all `passes` flags and completion timestamps (explicit user reset).
    pub fn reset_stories(&mut self) {
        for story in &mut self.user_stories {
            story.passes = false;
            story.completed_at = None;
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_backlog() -> Backlog {
        let mut backlog = Backlog::new("demo", "Demo project");
        backlog.branch_name = "feature/demo".to_string();
        backlog.user_stories = vec![
            Story::new("US-001", "First", 1),
            Story::new("US-002", "Second", 2),
        ];
        backlog
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backlog.json");

        let mut backlog = sample_backlog();
        backlog.user_stories[0].acceptance_criteria = vec!["does the thing".to_string()];
        backlog.user_stories[0].test_plan = Some("run the tests".to_string());
        backlog.save(&path).unwrap();

        let loaded = Backlog::load(&path).unwrap();
        assert_eq!(loaded, backlog);
    }

    #[test]
    fn test_wire_format_uses_camel_case_names() {
        let backlog = sample_backlog();
        let json = serde_json::to_string(&backlog).unwrap();
        assert!(json.contains("\"branchName\""));
        assert!(json.contains("\"userStories\""));
        assert!(json.contains("\"acceptanceCriteria\""));
    }

    #[test]
    fn test_load_missing_passes_is_schema_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backlog.json");
        fs::write(
            &path,
            r#"{
                "project": "p", "branchName": "b", "description": "d",
                "created_at": "2025-01-01T00:00:00Z", "updated_at": "2025-01-01T00:00:00Z",
                "userStories": [{
                    "id": "US-001", "title": "t", "description": "d",
                    "acceptanceCriteria": [], "priority": 1
                }]
            }"#,
        )
        .unwrap();

        let err = Backlog::load(&path).unwrap_err();
        assert!(matches!(err, LoopError::Schema { .. }));
        assert!(err.to_string().contains("passes"));
    }

    #[test]
    fn test_load_non_boolean_passes_is_schema_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backlog.json");
        fs::write(
            &path,
            r#"{
                "project": "p", "branchName": "b", "description": "d",
                "created_at": "2025-01-01T00:00:00Z", "updated_at": "2025-01-01T00:00:00Z",
                "userStories": [{
                    "id": "US-001", "title": "t", "description": "d",
                    "acceptanceCriteria": [], "priority": 1, "passes": "yes"
                }]
            }"#,
        )
        .unwrap();

        assert!(matches!(
            Backlog::load(&path).unwrap_err(),
            LoopError::Schema { .. }
        ));
    }

    #[test]
    fn test_load_missing_file_is_schema_error() {
        let err = Backlog::load(Path::new("/nonexistent/backlog.json")).unwrap_err();
        assert!(matches!(err, LoopError::Schema { .. }));
    }

    #[test]
    fn test_next_eligible_story_lowest_priority_wins() {
        let mut backlog = sample_backlog();
        // Priority 1 story listed second: order must not matter.
        backlog.user_stories = vec![
            Story::new("US-002", "Second", 2),
            Story::new("US-001", "First", 1),
        ];
        assert_eq!(backlog.next_eligible_story().unwrap().id, "US-001");
    }

    #[test]
    fn test_next_eligible_story_tie_keeps_list_order() {
        let mut backlog = sample_backlog();
        backlog.user_stories = vec![
            Story::new("US-003", "A", 1),
            Story::new("US-004", "B", 1),
        ];
        assert_eq!(backlog.next_eligible_story().unwrap().id, "US-003");
    }

    #[test]
    fn test_next_eligible_story_skips_passed() {
        let mut backlog = sample_backlog();
        backlog.user_stories[0].passes = true;
        assert_eq!(backlog.next_eligible_story().unwrap().id, "US-002");

        backlog.user_stories[1].passes = true;
        assert!(backlog.next_eligible_story().is_none());
    }

    #[test]
    fn test_mark_story_result_pass_sets_completed_at() {
        let mut backlog = sample_backlog();
        backlog
            .mark_story_result("US-001", true, "implemented", &[])
            .unwrap();

        let story = backlog.story("US-001").unwrap();
        assert!(story.passes);
        assert!(story.completed_at.is_some());
        assert_eq!(story.notes, "implemented");
    }

    #[test]
    fn test_mark_story_result_pass_is_idempotent() {
        let mut backlog = sample_backlog();
        backlog.mark_story_result("US-001", true, "", &[]).unwrap();
        let first_completed = backlog.story("US-001").unwrap().completed_at;

        backlog.mark_story_result("US-001", true, "", &[]).unwrap();
        assert_eq!(backlog.story("US-001").unwrap().completed_at, first_completed);
    }

    #[test]
    fn test_mark_story_result_failure_appends_notes() {
        let mut backlog = sample_backlog();
        backlog
            .mark_story_result("US-001", false, "attempt 1 failed", &[])
            .unwrap();
        backlog
            .mark_story_result("US-001", false, "attempt 2 failed", &["src/lib.rs".to_string()])
            .unwrap();

        let story = backlog.story("US-001").unwrap();
        assert!(!story.passes);
        assert!(story.completed_at.is_none());
        assert_eq!(
            story.notes,
            "attempt 1 failed\nattempt 2 failed\nfiles: src/lib.rs"
        );
    }

    #[test]
    fn test_mark_story_result_unknown_id() {
        let mut backlog = sample_backlog();
        let err = backlog
            .mark_story_result("US-999", true, "", &[])
            .unwrap_err();
        assert!(matches!(err, LoopError::UnknownStory { .. }));
    }

    #[test]
    fn test_progress_and_complete() {
        let mut backlog = sample_backlog();
        assert_eq!(backlog.progress(), (0, 2));
        assert!(!backlog.is_complete());

        backlog.mark_story_result("US-001", true, "", &[]).unwrap();
        backlog.mark_story_result("US-002", true, "", &[]).unwrap();
        assert_eq!(backlog.progress(), (2, 2));
        assert!(backlog.is_complete());
    }

    #[test]
    fn test_reset_stories_clears_passes() {
        let mut backlog = sample_backlog();
        backlog.mark_story_result("US-001", true, "", &[]).unwrap();
        backlog.reset_stories();

        assert!(!backlog.user_stories[0].passes);
        assert!(backlog.user_stories[0].completed_at.is_none());
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backlog.json");

        let mut backlog = sample_backlog();
        backlog.save(&path).unwrap();
        let first = Backlog::fingerprint(&path).unwrap();

        backlog.mark_story_result("US-001", true, "", &[]).unwrap();
        backlog.save(&path).unwrap();
        let second = Backlog::fingerprint(&path).unwrap();

        assert_ne!(first, second);
        assert_eq!(first.len(), 64);
    }
}
