//! Prompt rendering for agent invocations.
//!
//! One prompt per invocation: the target story, its acceptance criteria, the
//! overall backlog progress, and the exact status-block contract the
//! extractor parses.

use std::fmt::Write as _;
use std::path::Path;

use crate::backlog::{Backlog, Story};
use crate::outcome::{COMPLETION_MARKER, STATUS_BEGIN, STATUS_END};

/// Render the implementation prompt for one story.
#[must_use]
pub fn render_story_prompt(backlog: &Backlog, story: &Story, backlog_path: &Path) -> String {
    let (passed, total) = backlog.progress();
    let mut prompt = String::new();

    let _ = writeln!(
        prompt,
        "You are implementing user stories for the project \"{}\" on branch \"{}\".",
        backlog.project, backlog.branch_name
    );
    let _ = writeln!(
        prompt,
        "Progress so far: {passed}/{total} stories passing. The backlog lives at {}.",
        backlog_path.display()
    );
    prompt.push('\n');

    let _ = writeln!(prompt, "Your current story is {} ({}).", story.id, story.title);
    if !story.description.is_empty() {
        let _ = writeln!(prompt, "\n{}", story.description);
    }

    if !story.acceptance_criteria.is_empty() {
        prompt.push_str("\nAcceptance criteria:\n");
        for criterion in &story.acceptance_criteria {
            let _ = writeln!(prompt, "- {criterion}");
        }
    }
    if let Some(test_plan) = &story.test_plan {
        let _ = writeln!(prompt, "\nTest plan:\n{test_plan}");
    }
    if !story.notes.is_empty() {
        let _ = writeln!(prompt, "\nNotes from previous attempts:\n{}", story.notes);
    }

    prompt.push_str(&format!(
        "\nWork on exactly this one story. Implement it, run the relevant tests, and \
         verify every acceptance criterion before claiming it passes.\n\
         \n\
         When you are done, end your reply with this exact block:\n\
         \n\
         {STATUS_BEGIN}\n\
         STATUS: COMPLETE | IN_PROGRESS | FAILED\n\
         STORY_ID: {id}\n\
         STORY_PASSED: true | false\n\
         FILES_MODIFIED: [\"path/one\", \"path/two\"]\n\
         EXIT_SIGNAL: true | false\n\
         {STATUS_END}\n\
         \n\
         Set STORY_PASSED to true only when every acceptance criterion is verified. \
         Set EXIT_SIGNAL to true only if continuing is pointless (for example the \
         environment is broken in a way you cannot fix).\n\
         \n\
         If you can see that EVERY story in the backlog is already implemented and \
         passing, also output the line {COMPLETION_MARKER} on its own.\n",
        id = story.id,
    ));

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixture() -> (Backlog, PathBuf) {
        let mut backlog = Backlog::new("demo", "Demo project");
        backlog.branch_name = "feature/demo".to_string();
        let mut story = Story::new("US-001", "Add login", 1);
        story.description = "Users can log in with email and password.".to_string();
        story.acceptance_criteria = vec![
            "login form renders".to_string(),
            "invalid password rejected".to_string(),
        ];
        backlog.user_stories.push(story);
        (backlog, PathBuf::from("backlog.json"))
    }

    #[test]
    fn test_prompt_names_story_and_criteria() {
        let (backlog, path) = fixture();
        let prompt = render_story_prompt(&backlog, &backlog.user_stories[0], &path);

        assert!(prompt.contains("US-001"));
        assert!(prompt.contains("Add login"));
        assert!(prompt.contains("- login form renders"));
        assert!(prompt.contains("- invalid password rejected"));
    }

    #[test]
    fn test_prompt_contains_status_contract() {
        let (backlog, path) = fixture();
        let prompt = render_story_prompt(&backlog, &backlog.user_stories[0], &path);

        assert!(prompt.contains(STATUS_BEGIN));
        assert!(prompt.contains(STATUS_END));
        assert!(prompt.contains("STORY_ID: US-001"));
        assert!(prompt.contains(COMPLETION_MARKER));
    }

    #[test]
    fn test_prompt_includes_prior_notes() {
        let (mut backlog, path) = fixture();
        backlog
            .mark_story_result("US-001", false, "tests flaky on CI", &[])
            .unwrap();
        let prompt = render_story_prompt(&backlog, &backlog.user_stories[0], &path);
        assert!(prompt.contains("tests flaky on CI"));
    }
}
