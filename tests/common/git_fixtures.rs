//! Git repository test fixtures
//!
//! Provides temporary project repositories, optionally carrying a nested
//! `.trellis` tooling repository, for exercising the scoped views.

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// A temporary project repository for testing
///
/// The repository is automatically cleaned up when the `TestRepo`
/// is dropped. `path` is canonical, so it compares equal to the roots
/// reported by the repository handles.
pub struct TestRepo {
    /// TempDir handle (keeps directory alive until dropped)
    _dir: TempDir,
    /// Path to the repository root
    pub path: PathBuf,
}

#[allow(dead_code)] // Each integration module uses a different subset
impl TestRepo {
    /// Create a new test repository with an initial commit
    ///
    /// The repository will have:
    /// - Git initialized
    /// - User configured (test@example.com)
    /// - GPG signing disabled (for CI compatibility)
    /// - A README.md file
    /// - One initial commit
    pub fn new() -> Self {
        let repo = Self::empty();
        repo.commit_file("README.md", "# Test Repository\n", "Initial commit");
        repo
    }

    /// Create a repository with no commits
    pub fn empty() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().canonicalize().expect("Failed to canonicalize");
        Self::init(&path);
        Self { _dir: dir, path }
    }

    /// Create a project repository with an initialized tooling repository
    pub fn with_tooling() -> Self {
        let repo = Self::new();
        repo.init_tooling();
        repo
    }

    /// A plain directory (no git at all) with the same cleanup behavior
    pub fn plain_dir() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().canonicalize().expect("Failed to canonicalize");
        Self { _dir: dir, path }
    }

    fn init(path: &Path) {
        Self::git(path, &["init", "-q"]);
        Self::git(path, &["config", "user.email", "test@example.com"]);
        Self::git(path, &["config", "user.name", "Test User"]);
        // Disable GPG signing to ensure tests work on machines with global signing enabled
        Self::git(path, &["config", "commit.gpgsign", "false"]);
    }

    /// Initialize `.trellis` as its own repository
    pub fn init_tooling(&self) -> PathBuf {
        let tooling = self.tooling_path();
        std::fs::create_dir_all(&tooling).unwrap();
        Self::init(&tooling);
        tooling
    }

    pub fn tooling_path(&self) -> PathBuf {
        self.path.join(".trellis")
    }

    /// Add a file and commit it
    pub fn commit_file(&self, filename: &str, content: &str, message: &str) {
        self.create_file(filename, content);
        Self::git(&self.path, &["add", filename]);
        Self::git(&self.path, &["commit", "-q", "-m", message]);
    }

    /// Create a file without staging or committing
    /// Creates parent directories if they don't exist.
    pub fn create_file(&self, filename: &str, content: &str) {
        write_file(&self.path, filename, content);
    }

    /// Create a file inside the tooling directory
    pub fn create_tooling_file(&self, filename: &str, content: &str) {
        write_file(&self.tooling_path(), filename, content);
    }

    /// Stage a file without committing
    pub fn stage_file(&self, filename: &str) {
        Self::git(&self.path, &["add", filename]);
    }

    /// Commit id of HEAD in the repository at `path`
    pub fn head(path: &Path) -> String {
        Self::git_output(path, &["rev-parse", "HEAD"]).trim().to_string()
    }

    /// Number of commits reachable from HEAD at `path` (0 when unborn)
    pub fn commit_count(path: &Path) -> usize {
        let output = Command::new("git")
            .args(["rev-list", "--count", "HEAD"])
            .current_dir(path)
            .output()
            .expect("Failed to count commits");
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .unwrap_or(0)
    }

    /// Run a git command in the specified directory, asserting success
    pub fn git(path: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(args)
            .current_dir(path)
            .output()
            .expect("Failed to run git command");

        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    /// Run a git command and return its stdout
    pub fn git_output(path: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(path)
            .output()
            .expect("Failed to run git command");
        assert!(output.status.success(), "git {:?} failed", args);
        String::from_utf8_lossy(&output.stdout).to_string()
    }
}

fn write_file(root: &Path, filename: &str, content: &str) {
    let file_path = root.join(filename);
    if let Some(parent) = file_path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(file_path, content).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_creation() {
        let repo = TestRepo::new();
        assert!(repo.path.join(".git").exists());
        assert!(repo.path.join("README.md").exists());
        assert_eq!(TestRepo::commit_count(&repo.path), 1);
    }

    #[test]
    fn test_with_tooling() {
        let repo = TestRepo::with_tooling();
        assert!(repo.tooling_path().join(".git").exists());
        assert_eq!(TestRepo::commit_count(&repo.tooling_path()), 0);
    }
}
