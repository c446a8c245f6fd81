//! Integration tests for the storyloop CLI

use assert_cmd::cargo;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the storyloop binary
fn storyloop() -> Command {
    Command::new(cargo::cargo_bin!("storyloop"))
}

fn write_backlog(temp: &TempDir, stories_json: &str) {
    let json = format!(
        r#"{{
            "project": "demo",
            "branchName": "feature/demo",
            "description": "demo backlog",
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z",
            "userStories": [{stories_json}]
        }}"#
    );
    std::fs::write(temp.path().join("backlog.json"), json).unwrap();
}

const STORY_OPEN: &str = r#"{
    "id": "US-001", "title": "First story", "description": "d",
    "acceptanceCriteria": ["works"], "priority": 1, "passes": false
}"#;

const STORY_PASSED: &str = r#"{
    "id": "US-001", "title": "First story", "description": "d",
    "acceptanceCriteria": ["works"], "priority": 1, "passes": true
}"#;

#[test]
fn test_help() {
    storyloop()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Autonomous implementation loop"));
}

#[test]
fn test_version() {
    storyloop()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_status_shows_progress() {
    let temp = TempDir::new().unwrap();
    write_backlog(&temp, STORY_OPEN);

    storyloop()
        .arg("--project")
        .arg(temp.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("0/1 stories passing"))
        .stdout(predicate::str::contains("US-001"))
        .stdout(predicate::str::contains("No sessions yet"));
}

#[test]
fn test_status_missing_backlog_fails() {
    let temp = TempDir::new().unwrap();

    storyloop()
        .arg("--project")
        .arg(temp.path())
        .arg("status")
        .assert()
        .failure()
        .code(7)
        .stderr(predicate::str::contains("schema error"));
}

#[test]
fn test_run_malformed_backlog_fails_with_schema_code() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("backlog.json"), "{ not json").unwrap();

    storyloop()
        .arg("--project")
        .arg(temp.path())
        .arg("run")
        .arg("--agent-cmd")
        .arg("sh")
        .assert()
        .failure()
        .code(7)
        .stderr(predicate::str::contains("backlog.json"));

    // The run never started, so no session directory was created.
    assert!(!temp.path().join(".storyloop/logs").exists());
}

#[test]
fn test_run_resume_with_no_sessions_fails() {
    let temp = TempDir::new().unwrap();
    write_backlog(&temp, STORY_OPEN);

    storyloop()
        .arg("--project")
        .arg(temp.path())
        .arg("run")
        .arg("--resume")
        .arg("--agent-cmd")
        .arg("sh")
        .assert()
        .failure()
        .code(8)
        .stderr(predicate::str::contains("No resumable session"));
}

#[test]
fn test_run_completes_backlog_with_stub_agent() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    write_backlog(&temp, STORY_OPEN);

    // Stub agent that always reports a pass for US-001.
    let script = temp.path().join("fake-agent");
    std::fs::write(
        &script,
        "#!/bin/sh\n\
         cat > /dev/null\n\
         echo '---STORYLOOP_STATUS---'\n\
         echo 'STATUS: COMPLETE'\n\
         echo 'STORY_ID: US-001'\n\
         echo 'STORY_PASSED: true'\n\
         echo 'EXIT_SIGNAL: false'\n\
         echo '---END_STORYLOOP_STATUS---'\n",
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    storyloop()
        .arg("--project")
        .arg(temp.path())
        .arg("run")
        .arg("--agent-cmd")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("all_complete"));

    // The backlog was updated on disk and a session was recorded.
    let contents = std::fs::read_to_string(temp.path().join("backlog.json")).unwrap();
    assert!(contents.contains("\"passes\": true"));
    assert!(temp.path().join(".storyloop/logs").exists());
}

#[test]
fn test_reset_removes_session_logs() {
    let temp = TempDir::new().unwrap();
    write_backlog(&temp, STORY_PASSED);
    let logs = temp.path().join(".storyloop/logs/session_20250101_000000");
    std::fs::create_dir_all(&logs).unwrap();

    storyloop()
        .arg("--project")
        .arg(temp.path())
        .arg("reset")
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed"));

    assert!(!temp.path().join(".storyloop/logs").exists());
}

#[test]
fn test_reset_stories_clears_pass_flags() {
    let temp = TempDir::new().unwrap();
    write_backlog(&temp, STORY_PASSED);

    storyloop()
        .arg("--project")
        .arg(temp.path())
        .arg("reset")
        .arg("--stories")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared pass flags"));

    let contents = std::fs::read_to_string(temp.path().join("backlog.json")).unwrap();
    assert!(contents.contains("\"passes\": false"));
}

#[test]
fn test_reset_without_logs_is_a_noop() {
    let temp = TempDir::new().unwrap();
    write_backlog(&temp, STORY_OPEN);

    storyloop()
        .arg("--project")
        .arg(temp.path())
        .arg("reset")
        .assert()
        .success()
        .stdout(predicate::str::contains("No session logs"));
}
