//! The tooling repository: a nested git repository living in the project's
//! `.trellis/` directory, committed to automatically at workflow checkpoints

use std::path::{Path, PathBuf};

use super::error::RepoError;
use super::path_scope::has_component;
use super::repo::{commit_staged, RepoHandle, ScopedRepository};
use super::status::CommitResult;

/// Name of the tooling subdirectory inside a project
pub const TOOLING_DIR: &str = ".trellis";

/// How automatic commits are worded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSettings {
    /// Subject prefix for checkpoint commits, as in `prefix(workflow): action`
    pub prefix: String,
    /// Value of the `Co-Authored-By` trailer
    pub co_author: String,
}

impl Default for CommitSettings {
    fn default() -> Self {
        Self {
            prefix: "trellis".to_string(),
            co_author: "Trellis <trellis@localhost>".to_string(),
        }
    }
}

/// Scoped view over `<project>/.trellis`
#[derive(Debug)]
pub struct ToolingRepository {
    handle: RepoHandle,
    settings: CommitSettings,
}

impl ToolingRepository {
    pub fn open(project_dir: &Path) -> Result<Self, RepoError> {
        Self::open_with(project_dir, CommitSettings::default())
    }

    /// Open with explicit commit wording.
    ///
    /// Requires `<project_dir>/.trellis/.git`; anything else is
    /// `NotInitialized`.
    pub fn open_with(project_dir: &Path, settings: CommitSettings) -> Result<Self, RepoError> {
        let root = tooling_root(project_dir);
        if !root.join(".git").exists() {
            return Err(RepoError::NotInitialized(root));
        }
        let handle = RepoHandle::open(&root)?;
        Ok(Self { handle, settings })
    }

    /// Open, run `f`, and close on every exit path
    pub fn with_open<T, E>(
        project_dir: &Path,
        settings: CommitSettings,
        f: impl FnOnce(&Self) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<RepoError>,
    {
        let repo = Self::open_with(project_dir, settings)?;
        let result = f(&repo);
        repo.close();
        result
    }

    pub fn close(self) {}

    pub fn settings(&self) -> &CommitSettings {
        &self.settings
    }

    /// Full commit message: the caller's text followed by the trailer block
    pub fn format_message(&self, message: &str, session_id: Option<&str>) -> String {
        let mut full = format!(
            "{}\n\nCo-Authored-By: {}\n",
            message.trim_end(),
            self.settings.co_author
        );
        if let Some(id) = session_id.map(str::trim).filter(|id| !id.is_empty()) {
            full.push_str(&format!("Session-Id: {}\n", single_line(id)));
        }
        full
    }

    /// Stage everything uncommitted in scope and commit it.
    ///
    /// A clean tree yields a no-changes result and no commit.
    pub fn commit_pending(
        &self,
        message: &str,
        session_id: Option<&str>,
    ) -> Result<CommitResult, RepoError> {
        let full = self.format_message(message, session_id);
        let base = self.head()?;
        if !self.has_changes()? {
            tracing::debug!("Tooling repository clean; nothing to commit");
            return Ok(CommitResult::empty(&full));
        }
        self.stage(&[self.root()])?;
        commit_staged(self, &full, None, base.as_deref())
    }

    /// Commit a workflow phase transition
    pub fn checkpoint(
        &self,
        workflow: &str,
        action: &str,
        session_id: Option<&str>,
    ) -> Result<CommitResult, RepoError> {
        let subject = format!(
            "{}({}): {}",
            self.settings.prefix,
            single_line(workflow),
            single_line(action)
        );
        tracing::info!(workflow = %workflow, action = %action, "Checkpoint");
        self.commit_pending(&subject, session_id)
    }

    /// Stage and commit only `paths`; other pending changes stay as they are
    pub fn commit_files<P: AsRef<Path>>(
        &self,
        paths: &[P],
        message: &str,
        session_id: Option<&str>,
    ) -> Result<CommitResult, RepoError> {
        let full = self.format_message(message, session_id);
        let base = self.head()?;
        let staged: Vec<PathBuf> = self.stage(paths)?.into_iter().collect();
        commit_staged(self, &full, Some(staged.as_slice()), base.as_deref())
    }
}

impl ScopedRepository for ToolingRepository {
    fn handle(&self) -> &RepoHandle {
        &self.handle
    }

    fn in_scope(&self, rel: &Path) -> bool {
        !has_component(rel, ".git")
    }
}

/// `<project_dir>/.trellis`
pub fn tooling_root(project_dir: &Path) -> PathBuf {
    project_dir.join(TOOLING_DIR)
}

fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
