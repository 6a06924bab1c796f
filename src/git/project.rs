//! The project repository: the user's working tree with the tooling
//! subtree carved out. Mostly read-only history and diff queries.

use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use super::command::{literal_pathspec, slash_path, Git};
use super::error::RepoError;
use super::path_scope::has_component;
use super::repo::{RepoHandle, ScopedRepository};
use super::status::{parse_blame, parse_log, BlameLine, CommitInfo, DiffStats, LOG_FORMAT};
use super::tooling::TOOLING_DIR;

/// Scoped view over the enclosing git working tree, minus `.trellis`
#[derive(Debug)]
pub struct ProjectRepository {
    handle: RepoHandle,
}

impl ProjectRepository {
    /// Discover the working tree containing `start` by the usual upward
    /// search. Starting inside the tooling directory finds the project
    /// around it, never the tooling repository itself.
    pub fn open(start: &Path) -> Result<Self, RepoError> {
        let not_initialized = || RepoError::NotInitialized(start.to_path_buf());
        let start = fs::canonicalize(start).map_err(|_| not_initialized())?;
        let search_from = outside_tooling(&start);

        let output = Git::new(&search_from).output(["rev-parse", "--show-toplevel"])?;
        if !output.status.success() {
            return Err(not_initialized());
        }
        let toplevel = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let handle = RepoHandle::open(Path::new(&toplevel))?;
        Ok(Self { handle })
    }

    /// Open, run `f`, and close on every exit path
    pub fn with_open<T, E>(start: &Path, f: impl FnOnce(&Self) -> Result<T, E>) -> Result<T, E>
    where
        E: From<RepoError>,
    {
        let repo = Self::open(start)?;
        let result = f(&repo);
        repo.close();
        result
    }

    pub fn close(self) {}

    /// Unified diff of the working tree (or of the index when `staged`)
    pub fn get_diff(&self, staged: bool) -> Result<String, RepoError> {
        let args = self.diff_args(staged, &["--no-color", "--no-ext-diff"]);
        self.handle.git().run(args)
    }

    pub fn get_diff_stats(&self, staged: bool) -> Result<DiffStats, RepoError> {
        let args = self.diff_args(staged, &["--numstat", "-z", "--no-renames"]);
        let output = self.handle.git().run_bytes(args)?;
        DiffStats::parse_numstat(&output, |rel| self.in_scope(rel))
    }

    fn diff_args(&self, staged: bool, flags: &[&str]) -> Vec<OsString> {
        let mut args = vec![OsString::from("diff")];
        if staged {
            args.push("--cached".into());
        }
        args.extend(flags.iter().map(OsString::from));
        args.push("--".into());
        args.extend(self.scope_pathspecs());
        args
    }

    /// Up to `n` commits, newest first, optionally limited to those touching
    /// `path`, whose message matches `grep`, or whose author matches `author`
    pub fn get_log(
        &self,
        n: usize,
        path: Option<&Path>,
        grep: Option<&str>,
        author: Option<&str>,
    ) -> Result<Vec<CommitInfo>, RepoError> {
        self.query_log(Some(n), path, grep, author)
    }

    /// Every commit matching `grep` and `author`
    pub fn search_commits(
        &self,
        grep: Option<&str>,
        author: Option<&str>,
    ) -> Result<Vec<CommitInfo>, RepoError> {
        self.query_log(None, None, grep, author)
    }

    fn query_log(
        &self,
        limit: Option<usize>,
        path: Option<&Path>,
        grep: Option<&str>,
        author: Option<&str>,
    ) -> Result<Vec<CommitInfo>, RepoError> {
        let pathspecs = match path {
            Some(path) => vec![literal_pathspec(&self.scoped_entry(path)?)],
            None => self.scope_pathspecs(),
        };
        if self.head()?.is_none() {
            return Ok(Vec::new());
        }

        let mut args = vec![OsString::from("log"), LOG_FORMAT.into()];
        if let Some(n) = limit {
            args.push(format!("--max-count={n}").into());
        }
        if let Some(grep) = grep {
            args.push(format!("--grep={grep}").into());
        }
        if let Some(author) = author {
            args.push(format!("--author={author}").into());
        }
        args.push("--".into());
        args.extend(pathspecs);

        parse_log(&self.handle.git().run(args)?)
    }

    /// Line-by-line authorship of `path` as of `HEAD` plus local edits
    pub fn get_blame(&self, path: &Path) -> Result<Vec<BlameLine>, RepoError> {
        let rel = self.scoped_entry(path)?;
        let file = self.root().join(&rel);
        if fs::metadata(&file).map(|m| m.len() == 0).unwrap_or(false) {
            return Ok(Vec::new());
        }
        let mut args = vec![OsString::from("blame"), "--line-porcelain".into(), "--".into()];
        args.push(slash_path(&rel));
        let output = self.handle.git().run_bytes(args)?;
        parse_blame(&output)
    }

    /// Raw content of `path` at revision `sha`.
    ///
    /// `Ok(None)` when the revision exists but has no file at `path`.
    pub fn get_file_at_commit(&self, path: &Path, sha: &str) -> Result<Option<Vec<u8>>, RepoError> {
        let rel = self.scoped_entry(path)?;
        validate_revision(sha)?;
        let git = self.handle.git();

        let commit_spec = format!("{sha}^{{commit}}");
        let output = git.output(["rev-parse", "--verify", "--quiet", commit_spec.as_str()])?;
        if !output.status.success() {
            return Err(RepoError::RevisionNotFound(sha.to_string()));
        }
        let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();

        let mut object = OsString::from(format!("{commit}:"));
        object.push(slash_path(&rel));
        let kind = git.output([OsString::from("cat-file"), "-t".into(), object.clone()])?;
        if !kind.status.success() || String::from_utf8_lossy(&kind.stdout).trim() != "blob" {
            return Ok(None);
        }
        let content = git.run_bytes([OsString::from("cat-file"), "blob".into(), object])?;
        Ok(Some(content))
    }
}

impl ScopedRepository for ProjectRepository {
    fn handle(&self) -> &RepoHandle {
        &self.handle
    }

    fn in_scope(&self, rel: &Path) -> bool {
        !has_component(rel, TOOLING_DIR) && !has_component(rel, ".git")
    }

    fn excluded_pathspecs(&self) -> Vec<OsString> {
        vec![
            format!(":(exclude,glob)**/{TOOLING_DIR}").into(),
            format!(":(exclude,glob)**/{TOOLING_DIR}/**").into(),
        ]
    }
}

/// Accept abbreviated or full hex object ids only
pub fn validate_revision(sha: &str) -> Result<(), RepoError> {
    static REVISION: OnceLock<Regex> = OnceLock::new();
    let re = REVISION
        .get_or_init(|| Regex::new(r"^[0-9a-fA-F]{4,64}$").expect("revision pattern is valid"));
    if re.is_match(sha) {
        Ok(())
    } else {
        Err(RepoError::InvalidRevision(sha.to_string()))
    }
}

/// `path` cut just before its first tooling directory component
fn outside_tooling(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        if matches!(component, Component::Normal(name) if name == TOOLING_DIR) {
            break;
        }
        out.push(component.as_os_str());
    }
    out
}
