//! Integration tests for checkpoint commits
//!
//! A durable state store outside the project plus a real tooling
//! repository, driven the way hook handlers drive them.

use super::common::git_fixtures::TestRepo;
use tempfile::TempDir;
use trellis::checkpoint::{
    phase_key, run_checkpoint, CheckpointError, CheckpointOutcome, CheckpointRequest, COUNT_KEY,
    LAST_AT_KEY, LAST_SHA_KEY,
};
use trellis::data::{SqliteStateStore, StateStore, StateValue};
use trellis::git::{CommitSettings, ScopedRepository, ToolingRepository};

fn open_store() -> (TempDir, SqliteStateStore) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStateStore::open(dir.path().join("state.db")).unwrap();
    (dir, store)
}

fn request<'a>(workflow: &'a str, action: Option<&'a str>) -> CheckpointRequest<'a> {
    CheckpointRequest {
        workflow,
        action,
        session_id: None,
    }
}

#[test]
fn test_checkpoint_commits_and_records_bookkeeping() {
    let repo = TestRepo::with_tooling();
    repo.create_tooling_file("feature/plan.md", "# Plan\n");
    let (_dir, store) = open_store();

    let outcome = run_checkpoint(
        &store,
        &repo.path,
        request("feature", Some("plan-approved")),
        &CommitSettings::default(),
    )
    .unwrap();

    let CheckpointOutcome::Committed(result) = outcome else {
        panic!("expected a commit, got {outcome:?}");
    };
    let sha = result.sha.clone().unwrap();
    assert_eq!(TestRepo::head(&repo.tooling_path()), sha);
    assert_eq!(store.get(LAST_SHA_KEY).unwrap(), StateValue::Text(sha));
    assert_eq!(store.get(COUNT_KEY).unwrap(), StateValue::Int(1));
    let last_at = store.get_entry(LAST_AT_KEY).unwrap().unwrap();
    assert_eq!(last_at.updated_by.as_deref(), Some("checkpoint"));

    let subject = TestRepo::git_output(&repo.tooling_path(), &["log", "-1", "--format=%s"]);
    assert_eq!(subject.trim(), "trellis(feature): plan-approved");

    // The project repository never sees tooling commits
    assert_eq!(TestRepo::commit_count(&repo.path), 1);
}

#[test]
fn test_second_checkpoint_on_clean_tree_reports_no_changes() {
    let repo = TestRepo::with_tooling();
    repo.create_tooling_file("notes.md", "x");
    let (_dir, store) = open_store();
    let settings = CommitSettings::default();

    let first = run_checkpoint(&store, &repo.path, request("w", Some("a")), &settings).unwrap();
    assert!(matches!(first, CheckpointOutcome::Committed(_)));
    let second = run_checkpoint(&store, &repo.path, request("w", Some("b")), &settings).unwrap();
    assert_eq!(second, CheckpointOutcome::NoChanges);

    assert_eq!(TestRepo::commit_count(&repo.tooling_path()), 1);
    assert_eq!(store.get(COUNT_KEY).unwrap(), StateValue::Int(1));
}

#[test]
fn test_count_accumulates_across_checkpoints() {
    let repo = TestRepo::with_tooling();
    let (_dir, store) = open_store();
    let settings = CommitSettings::default();

    for round in 0..3 {
        repo.create_tooling_file("log.md", &format!("round {round}\n"));
        let outcome =
            run_checkpoint(&store, &repo.path, request("w", Some("step")), &settings).unwrap();
        assert!(matches!(outcome, CheckpointOutcome::Committed(_)));
    }
    assert_eq!(store.get(COUNT_KEY).unwrap(), StateValue::Int(3));
    assert_eq!(TestRepo::commit_count(&repo.tooling_path()), 3);
}

#[test]
fn test_action_defaults_to_recorded_phase() {
    let repo = TestRepo::with_tooling();
    repo.create_tooling_file("design.md", "x");
    let (_dir, store) = open_store();
    store
        .set(&phase_key("bugfix"), "reproduce".into(), Some("session"))
        .unwrap();

    let outcome = run_checkpoint(
        &store,
        &repo.path,
        CheckpointRequest {
            workflow: "bugfix",
            action: None,
            session_id: Some("abc-123"),
        },
        &CommitSettings {
            prefix: "wf".to_string(),
            co_author: "Bot <bot@example.com>".to_string(),
        },
    )
    .unwrap();
    assert!(matches!(outcome, CheckpointOutcome::Committed(_)));

    let body = TestRepo::git_output(&repo.tooling_path(), &["log", "-1", "--format=%B"]);
    assert!(body.starts_with("wf(bugfix): reproduce\n"));
    assert!(body.contains("Co-Authored-By: Bot <bot@example.com>"));
    assert!(body.contains("Session-Id: abc-123"));
}

#[test]
fn test_missing_phase_fails_before_touching_git() {
    let repo = TestRepo::with_tooling();
    repo.create_tooling_file("design.md", "x");
    let (_dir, store) = open_store();

    let err = run_checkpoint(
        &store,
        &repo.path,
        request("unknown", None),
        &CommitSettings::default(),
    )
    .unwrap_err();
    assert!(matches!(err, CheckpointError::MissingAction(_)));

    let tooling = ToolingRepository::open(&repo.path).unwrap();
    assert!(tooling.has_changes().unwrap());
}

#[test]
fn test_uninitialized_tooling_is_skipped() {
    let repo = TestRepo::new();
    let (_dir, store) = open_store();

    let outcome = run_checkpoint(
        &store,
        &repo.path,
        request("w", Some("a")),
        &CommitSettings::default(),
    )
    .unwrap();
    assert!(matches!(outcome, CheckpointOutcome::Skipped { .. }));
    assert!(!store.contains(COUNT_KEY).unwrap());
}
