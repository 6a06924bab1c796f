//! Integration tests for the project repository
//!
//! History, diff and blame queries over a real working tree, with the
//! `.trellis` subtree always out of reach.

use super::common::git_fixtures::TestRepo;
use std::path::{Path, PathBuf};
use std::process::Command;
use trellis::git::{ProjectRepository, RepoError, ScopedRepository};

#[test]
fn test_blame_on_fresh_one_line_file() {
    let repo = TestRepo::new();
    repo.commit_file("one.txt", "hello\n", "Add one line");

    let project = ProjectRepository::open(&repo.path).unwrap();
    let blame = project.get_blame(Path::new("one.txt")).unwrap();

    assert_eq!(blame.len(), 1);
    assert_eq!(blame[0].line_no, 1);
    assert_eq!(blame[0].content, "hello");
    assert_eq!(blame[0].author_name, "Test User");
    assert_eq!(blame[0].author_email, "test@example.com");
    assert_eq!(blame[0].sha, TestRepo::head(&repo.path));
}

#[test]
fn test_blame_on_empty_file() {
    let repo = TestRepo::new();
    repo.commit_file("empty.txt", "", "Add empty");
    let project = ProjectRepository::open(&repo.path).unwrap();
    assert!(project.get_blame(Path::new("empty.txt")).unwrap().is_empty());
}

#[test]
fn test_open_discovers_root_from_subdirectory_and_tooling_dir() {
    let repo = TestRepo::with_tooling();
    repo.create_file("src/nested/lib.rs", "");
    repo.create_tooling_file("notes/a.md", "");

    let from_sub = ProjectRepository::open(&repo.path.join("src/nested")).unwrap();
    assert_eq!(from_sub.root(), repo.path.as_path());

    let from_tooling = ProjectRepository::open(&repo.tooling_path().join("notes")).unwrap();
    assert_eq!(from_tooling.root(), repo.path.as_path());
}

#[test]
fn test_open_outside_repository() {
    let dir = TestRepo::plain_dir();
    assert!(matches!(
        ProjectRepository::open(&dir.path),
        Err(RepoError::NotInitialized(_))
    ));
}

#[test]
fn test_tooling_subtree_is_out_of_scope() {
    let repo = TestRepo::with_tooling();
    repo.create_tooling_file("plan.md", "x");
    repo.create_file("docs/.trellis/stray.md", "x");
    repo.create_file("src/lib.rs", "pub fn f() {}\n");

    let project = ProjectRepository::open(&repo.path).unwrap();
    assert!(project.validate_path(Path::new("src/lib.rs")));
    assert!(!project.validate_path(Path::new(".trellis/plan.md")));
    assert!(!project.validate_path(Path::new("docs/.trellis/stray.md")));
    assert!(!project.validate_path(Path::new("src/../.trellis")));

    let status = project.status().unwrap();
    assert_eq!(
        status.untracked.into_iter().collect::<Vec<_>>(),
        vec![PathBuf::from("src/lib.rs")]
    );
    assert!(matches!(
        project.get_blame(Path::new(".trellis/plan.md")),
        Err(RepoError::PathViolation { .. })
    ));
}

#[test]
fn test_project_commit_never_includes_tooling() {
    let repo = TestRepo::with_tooling();
    repo.create_tooling_file("plan.md", "x");
    repo.create_file("src/lib.rs", "pub fn f() {}\n");

    let project = ProjectRepository::open(&repo.path).unwrap();
    let staged = project.stage(&[repo.path.as_path()]).unwrap();
    assert_eq!(staged.len(), 1);
    let result = project.commit("Add lib").unwrap();

    assert_eq!(
        result.files.into_iter().collect::<Vec<_>>(),
        vec![PathBuf::from("src/lib.rs")]
    );
    let tree = TestRepo::git_output(&repo.path, &["ls-tree", "-r", "--name-only", "HEAD"]);
    assert!(!tree.contains(".trellis"));
    assert!(!project.has_changes().unwrap());
}

#[cfg(unix)]
#[test]
fn test_project_stage_refuses_link_into_tooling() {
    let repo = TestRepo::with_tooling();
    repo.create_tooling_file("plan.md", "x");
    repo.create_file("src/lib.rs", "");
    std::os::unix::fs::symlink(".trellis/plan.md", repo.path.join("plan-link")).unwrap();

    let project = ProjectRepository::open(&repo.path).unwrap();
    assert!(matches!(
        project.stage(&[repo.path.as_path()]),
        Err(RepoError::PathViolation { .. })
    ));
    assert!(project.status().unwrap().staged.is_empty());
    assert_eq!(
        project.stage(&["src"]).unwrap().into_iter().collect::<Vec<_>>(),
        vec![PathBuf::from("src/lib.rs")]
    );
}

#[test]
fn test_diff_and_stats() {
    let repo = TestRepo::new();
    repo.create_file("README.md", "# Test Repository\nline one\nline two\n");
    std::fs::write(repo.path.join("logo.bin"), [0u8, 159, 146, 150, 0, 1]).unwrap();
    repo.stage_file("logo.bin");

    let project = ProjectRepository::open(&repo.path).unwrap();

    let unstaged = project.get_diff_stats(false).unwrap();
    assert_eq!(unstaged.files_changed, 1);
    assert_eq!(unstaged.additions, 2);
    assert_eq!(unstaged.deletions, 0);
    assert!(project.get_diff(false).unwrap().contains("+line one"));

    let staged = project.get_diff_stats(true).unwrap();
    assert_eq!(staged.files_changed, 1);
    assert_eq!(staged.additions, 0);
    assert!(staged.has_changes());
}

#[test]
fn test_log_queries() {
    let repo = TestRepo::new();
    repo.commit_file("a.txt", "a", "Add feature alpha");
    repo.commit_file("b.txt", "b", "Fix bug in beta");
    repo.commit_file("a.txt", "a2", "Tweak alpha");

    let project = ProjectRepository::open(&repo.path).unwrap();

    let last_two = project.get_log(2, None, None, None).unwrap();
    assert_eq!(last_two.len(), 2);
    assert_eq!(last_two[0].subject, "Tweak alpha");
    assert_eq!(last_two[0].sha, TestRepo::head(&repo.path));
    assert!(last_two[0].sha.starts_with(&last_two[0].short_sha));

    let touching_a = project
        .get_log(10, Some(Path::new("a.txt")), None, None)
        .unwrap();
    let subjects: Vec<_> = touching_a.iter().map(|c| c.subject.as_str()).collect();
    assert_eq!(subjects, vec!["Tweak alpha", "Add feature alpha"]);

    let fixes = project.search_commits(Some("Fix"), None).unwrap();
    assert_eq!(fixes.len(), 1);
    assert_eq!(fixes[0].subject, "Fix bug in beta");

    let by_author = project.search_commits(None, Some("Test User")).unwrap();
    assert_eq!(by_author.len(), 4);
    assert!(project
        .search_commits(None, Some("Nobody Else"))
        .unwrap()
        .is_empty());
}

#[test]
fn test_log_on_empty_repository() {
    let repo = TestRepo::empty();
    let project = ProjectRepository::open(&repo.path).unwrap();
    assert!(project.get_log(5, None, None, None).unwrap().is_empty());
    assert!(project.get_last_commits(5).unwrap().is_empty());
}

#[test]
fn test_file_at_commit() {
    let repo = TestRepo::new();
    repo.commit_file("data.txt", "v1", "v1");
    let first = TestRepo::head(&repo.path);
    repo.commit_file("data.txt", "v2", "v2");

    let project = ProjectRepository::open(&repo.path).unwrap();
    assert_eq!(
        project
            .get_file_at_commit(Path::new("data.txt"), &first)
            .unwrap(),
        Some(b"v1".to_vec())
    );
    assert_eq!(
        project
            .get_file_at_commit(Path::new("data.txt"), &first[..8])
            .unwrap(),
        Some(b"v1".to_vec())
    );
    assert_eq!(
        project
            .get_file_at_commit(Path::new("missing.txt"), &first)
            .unwrap(),
        None
    );
    assert!(matches!(
        project.get_file_at_commit(Path::new("data.txt"), "deadbeefdeadbeef"),
        Err(RepoError::RevisionNotFound(_))
    ));
    assert!(matches!(
        project.get_file_at_commit(Path::new("data.txt"), "HEAD~1"),
        Err(RepoError::InvalidRevision(_))
    ));
    assert!(matches!(
        project.get_file_at_commit(Path::new(".trellis/x"), &first),
        Err(RepoError::PathViolation { .. })
    ));
}

#[test]
fn test_merge_conflicts_are_reported() {
    let repo = TestRepo::new();
    repo.commit_file("shared.txt", "base\n", "base");
    TestRepo::git(&repo.path, &["checkout", "-q", "-b", "other"]);
    repo.commit_file("shared.txt", "theirs\n", "theirs");
    TestRepo::git(&repo.path, &["checkout", "-q", "-"]);
    repo.commit_file("shared.txt", "ours\n", "ours");

    let merge = Command::new("git")
        .args(["merge", "other"])
        .current_dir(&repo.path)
        .output()
        .unwrap();
    assert!(!merge.status.success());

    let project = ProjectRepository::open(&repo.path).unwrap();
    let status = project.status().unwrap();
    assert!(status.conflicted.contains(Path::new("shared.txt")));
    assert!(!status.staged.contains(Path::new("shared.txt")));
}
