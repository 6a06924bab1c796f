//! The scoped repository abstraction shared by the tooling and project views.
//!
//! A [`ScopedRepository`] is a git working tree plus a predicate saying which
//! repository-relative paths it may read and mutate. Every operation here is
//! written once against that predicate; the two implementors only decide
//! where the root is and what the predicate excludes.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use super::command::{literal_pathspec, slash_path, Git};
use super::error::RepoError;
use super::path_scope::{relative_to, resolve_entry, resolve_path};
use super::status::{
    bytes_to_path, parse_log, CommitInfo, CommitResult, DiscardResult, RepoStatus, LOG_FORMAT,
};

/// An open handle on a git working tree
#[derive(Debug)]
pub struct RepoHandle {
    root: PathBuf,
    git_dir: PathBuf,
}

impl RepoHandle {
    /// Open the working tree rooted exactly at `root`.
    ///
    /// Fails with `NotInitialized` unless `root` is the top level of a git
    /// working tree.
    pub(crate) fn open(root: &Path) -> Result<Self, RepoError> {
        let not_initialized = || RepoError::NotInitialized(root.to_path_buf());
        let root = fs::canonicalize(root).map_err(|_| not_initialized())?;

        let output = Git::new(&root).output([
            "rev-parse",
            "--show-toplevel",
            "--absolute-git-dir",
        ])?;
        if !output.status.success() {
            return Err(not_initialized());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut lines = stdout.lines();
        let (Some(toplevel), Some(git_dir)) = (lines.next(), lines.next()) else {
            return Err(RepoError::Parse(format!("unexpected rev-parse output: {stdout:?}")));
        };
        let toplevel = fs::canonicalize(toplevel).map_err(|_| not_initialized())?;
        if toplevel != root {
            return Err(not_initialized());
        }

        tracing::debug!(root = %root.display(), "Opened repository");
        Ok(Self {
            root,
            git_dir: PathBuf::from(git_dir),
        })
    }

    /// Canonical working tree root
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub(crate) fn git(&self) -> Git<'_> {
        Git::new(&self.root)
    }
}

impl Drop for RepoHandle {
    fn drop(&mut self) {
        tracing::debug!(root = %self.root.display(), "Closed repository");
    }
}

/// Operations over a git working tree confined to a scope.
///
/// Implementors supply the handle and the scope predicate; everything else
/// is provided.
pub trait ScopedRepository {
    fn handle(&self) -> &RepoHandle;

    /// Whether a repository-relative path belongs to this scope
    fn in_scope(&self, rel: &Path) -> bool;

    /// Exclusion pathspecs for parts of the tree outside the scope
    fn excluded_pathspecs(&self) -> Vec<OsString> {
        Vec::new()
    }

    /// Pathspecs that restrict whole-tree git queries to the scope
    fn scope_pathspecs(&self) -> Vec<OsString> {
        let mut specs = vec![OsString::from(".")];
        specs.extend(self.excluded_pathspecs());
        specs
    }

    fn root(&self) -> &Path {
        self.handle().root()
    }

    /// True iff `path`, with `..` and every symlink resolved, lies inside
    /// this scope
    fn validate_path(&self, path: &Path) -> bool {
        self.scoped_entry(path).is_ok()
    }

    /// Repository-relative entry path for `path`, or `PathViolation`.
    ///
    /// Both the fully resolved location and the entry git would record
    /// (final component unresolved) must be in scope.
    fn scoped_entry(&self, path: &Path) -> Result<PathBuf, RepoError> {
        let root = self.root();
        let violation = || RepoError::PathViolation {
            path: path.to_path_buf(),
            scope: root.to_path_buf(),
        };

        let target = resolve_path(path, root)
            .and_then(|resolved| relative_to(&resolved, root))
            .ok_or_else(violation)?;
        let entry = resolve_entry(path, root)
            .and_then(|resolved| relative_to(&resolved, root))
            .ok_or_else(violation)?;
        if !self.in_scope(&target) || !self.in_scope(&entry) {
            return Err(violation());
        }
        Ok(entry)
    }

    /// Current `HEAD` commit, `None` on an unborn branch
    fn head(&self) -> Result<Option<String>, RepoError> {
        let output = self
            .handle()
            .git()
            .output(["rev-parse", "--verify", "--quiet", "HEAD^{commit}"])?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }

    fn status(&self) -> Result<RepoStatus, RepoError> {
        let mut args: Vec<OsString> = ["status", "--porcelain=v1", "-z", "--untracked-files=all", "--"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.extend(self.scope_pathspecs());
        let output = self.handle().git().run_bytes(args)?;
        let mut status = RepoStatus::parse_porcelain(&output)?;
        status.retain(|rel| self.in_scope(rel));
        Ok(status)
    }

    fn has_changes(&self) -> Result<bool, RepoError> {
        Ok(!self.status()?.is_clean())
    }

    /// Absolute paths of everything uncommitted in scope
    fn get_uncommitted_files(&self) -> Result<BTreeSet<PathBuf>, RepoError> {
        let root = self.root();
        Ok(self
            .status()?
            .all_paths()
            .into_iter()
            .map(|rel| root.join(rel))
            .collect())
    }

    /// Stage `paths` (additions, modifications and deletions).
    ///
    /// A directory argument stages every uncommitted path beneath it. All
    /// arguments, and every path a directory expands to, are validated
    /// before the index is touched. Returns the repository-relative paths
    /// that were staged.
    fn stage<P: AsRef<Path>>(&self, paths: &[P]) -> Result<BTreeSet<PathBuf>, RepoError> {
        let entries = paths
            .iter()
            .map(|p| self.scoped_entry(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if entries.is_empty() {
            return Ok(BTreeSet::new());
        }

        let changed = self
            .status()?
            .all_paths()
            .into_iter()
            .filter(|rel| entries.iter().any(|entry| rel.starts_with(entry)))
            .map(|rel| self.scoped_entry(&rel))
            .collect::<Result<BTreeSet<_>, _>>()?;
        if changed.is_empty() {
            return Ok(changed);
        }

        let mut args: Vec<OsString> = ["add", "-A", "--"].into_iter().map(OsString::from).collect();
        args.extend(changed.iter().map(|rel| literal_pathspec(rel)));
        args.extend(self.excluded_pathspecs());
        self.handle().git().run(args)?;

        tracing::debug!(count = changed.len(), "Staged paths");
        Ok(changed)
    }

    /// Unstage every in-scope index entry and restore tracked files from
    /// the index. Untracked files are left alone.
    fn discard_all(&self) -> Result<DiscardResult, RepoError> {
        discard_matching(self, None)
    }

    /// [`discard_all`](Self::discard_all) limited to entries under `paths`.
    /// Nothing matching is a no-op, not an error.
    fn discard_changes<P: AsRef<Path>>(&self, paths: &[P]) -> Result<DiscardResult, RepoError> {
        let filters = self.scoped_entries(paths)?;
        discard_matching(self, Some(filters.as_slice()))
    }

    /// Commit every in-scope staged change, leaving out-of-scope index
    /// entries as they were.
    fn commit(&self, message: &str) -> Result<CommitResult, RepoError> {
        let base = self.head()?;
        commit_staged(self, message, None, base.as_deref())
    }

    /// Commit only the staged changes under `paths`
    fn commit_paths<P: AsRef<Path>>(
        &self,
        message: &str,
        paths: &[P],
    ) -> Result<CommitResult, RepoError> {
        let base = self.head()?;
        let filters = self.scoped_entries(paths)?;
        commit_staged(self, message, Some(filters.as_slice()), base.as_deref())
    }

    /// [`scoped_entry`](Self::scoped_entry) for each of `paths`, failing on
    /// the first violation
    fn scoped_entries<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<PathBuf>, RepoError> {
        paths.iter().map(|p| self.scoped_entry(p.as_ref())).collect()
    }

    /// Most recent `n` commits, newest first
    fn get_last_commits(&self, n: usize) -> Result<Vec<CommitInfo>, RepoError> {
        if self.head()?.is_none() {
            return Ok(Vec::new());
        }
        let count = n.to_string();
        let output = self
            .handle()
            .git()
            .run(["log", "-n", count.as_str(), LOG_FORMAT])?;
        parse_log(&output)
    }
}

/// Unstage and restore the in-scope entries selected by `filters`
fn discard_matching<R: ScopedRepository + ?Sized>(
    repo: &R,
    filters: Option<&[PathBuf]>,
) -> Result<DiscardResult, RepoError> {
    let selected = |rel: &PathBuf| match filters {
        None => true,
        Some(filters) => filters.iter().any(|f| rel.starts_with(f)),
    };
    let git = repo.handle().git();

    let unstaged: BTreeSet<PathBuf> =
        repo.status()?.staged.into_iter().filter(|p| selected(p)).collect();
    if !unstaged.is_empty() {
        let specs = unstaged.iter().map(|rel| literal_pathspec(rel));
        let mut args: Vec<OsString> = if repo.head()?.is_some() {
            ["reset", "-q", "HEAD", "--"].into_iter().map(OsString::from).collect()
        } else {
            ["rm", "--cached", "-q", "-r", "--ignore-unmatch", "--"]
                .into_iter()
                .map(OsString::from)
                .collect()
        };
        args.extend(specs);
        git.run(args)?;
    }

    let restored: BTreeSet<PathBuf> =
        repo.status()?.modified.into_iter().filter(|p| selected(p)).collect();
    if !restored.is_empty() {
        let mut args: Vec<OsString> = ["checkout", "-q", "--"].into_iter().map(OsString::from).collect();
        args.extend(restored.iter().map(|rel| literal_pathspec(rel)));
        git.run(args)?;
    }

    tracing::info!(
        unstaged = unstaged.len(),
        restored = restored.len(),
        "Discarded changes"
    );
    Ok(DiscardResult { unstaged, restored })
}

/// Build and publish a commit from the staged entries under `filters`.
///
/// `base` is the `HEAD` snapshot the caller started from. The tree is
/// assembled in a private index seeded from `base`, so the shared index and
/// out-of-scope staged entries are never committed; the ref moves by
/// compare-and-swap against `base`.
pub(crate) fn commit_staged<R: ScopedRepository + ?Sized>(
    repo: &R,
    message: &str,
    filters: Option<&[PathBuf]>,
    base: Option<&str>,
) -> Result<CommitResult, RepoError> {
    let handle = repo.handle();
    let git = handle.git();

    // Staged entries get the same scope check as `stage` arguments
    let files = repo
        .status()?
        .staged
        .into_iter()
        .filter(|rel| filters.map_or(true, |fs| fs.iter().any(|f| rel.starts_with(f))))
        .map(|rel| repo.scoped_entry(&rel))
        .collect::<Result<BTreeSet<_>, _>>()?;
    if files.is_empty() {
        tracing::debug!("Nothing staged in scope");
        return Ok(CommitResult::empty(message));
    }
    let specs: Vec<OsString> = files.iter().map(|rel| literal_pathspec(rel)).collect();

    // Staged content for the selected paths, as index-info records
    let mut ls_args: Vec<OsString> = ["ls-files", "-s", "-z", "--"].into_iter().map(OsString::from).collect();
    ls_args.extend(specs.iter().cloned());
    let listing = git.run_bytes(ls_args)?;
    let mut present = BTreeSet::new();
    let mut index_info = Vec::new();
    for record in listing.split(|b| *b == 0).filter(|r| !r.is_empty()) {
        let Some(tab) = record.iter().position(|b| *b == b'\t') else {
            return Err(RepoError::Parse(format!(
                "malformed ls-files record: {:?}",
                String::from_utf8_lossy(record)
            )));
        };
        present.insert(bytes_to_path(&record[tab + 1..]));
        index_info.extend_from_slice(record);
        index_info.push(0);
    }
    let mut removed = Vec::new();
    for rel in files.iter().filter(|rel| !present.contains(*rel)) {
        removed.extend_from_slice(slash_path(rel).as_encoded_bytes());
        removed.push(0);
    }

    let scratch = tempfile::Builder::new()
        .prefix("trellis-index-")
        .tempdir_in(handle.git_dir())?;
    let index_path = scratch.path().join("index");
    let private = git.with_index(&index_path);

    match base {
        Some(sha) => private.run(["read-tree", sha])?,
        None => private.run(["read-tree", "--empty"])?,
    };
    if !index_info.is_empty() {
        private.run_with_input(["update-index", "-z", "--index-info"], &index_info)?;
    }
    if !removed.is_empty() {
        private.run_with_input(["update-index", "-z", "--force-remove", "--stdin"], &removed)?;
    }
    let tree = private.run(["write-tree"])?.trim().to_string();

    if let Some(sha) = base {
        let tree_spec = format!("{sha}^{{tree}}");
        let base_tree = git.run(["rev-parse", tree_spec.as_str()])?;
        if base_tree.trim() == tree {
            tracing::debug!("Staged changes match HEAD; nothing to commit");
            return Ok(CommitResult::empty(message));
        }
    }

    let mut commit_args = vec!["commit-tree".to_string(), tree];
    if let Some(sha) = base {
        commit_args.push("-p".to_string());
        commit_args.push(sha.to_string());
    }
    commit_args.push("-F".to_string());
    commit_args.push("-".to_string());
    let sha = git.run_with_input(&commit_args, message.as_bytes())?.trim().to_string();

    let current = repo.head()?;
    if current.as_deref() != base {
        tracing::warn!(expected = ?base, actual = ?current, "HEAD moved during commit");
        return Err(RepoError::conflict(base, current.as_deref()));
    }
    let subject = message.lines().next().unwrap_or_default();
    let reflog = format!("commit: {subject}");
    let old = base.unwrap_or("");
    if let Err(e) = git.run(["update-ref", "-m", reflog.as_str(), "HEAD", sha.as_str(), old]) {
        let current = repo.head()?;
        if current.as_deref() != base {
            tracing::warn!(expected = ?base, actual = ?current, "HEAD moved during commit");
            return Err(RepoError::conflict(base, current.as_deref()));
        }
        return Err(e);
    }

    tracing::info!(sha = %sha, files = files.len(), "Committed");
    Ok(CommitResult {
        sha: Some(sha),
        files,
        message: message.to_string(),
    })
}
