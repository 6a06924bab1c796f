//! Thin runner for `git` subprocesses

use std::ffi::OsStr;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use super::error::RepoError;

/// Variables that would redirect git away from `current_dir`. Hook
/// processes are often spawned by git itself with these set.
const INHERITED_GIT_ENV: &[&str] = &[
    "GIT_DIR",
    "GIT_WORK_TREE",
    "GIT_INDEX_FILE",
    "GIT_PREFIX",
    "GIT_COMMON_DIR",
    "GIT_OBJECT_DIRECTORY",
];

/// A git invocation context rooted at a working tree
#[derive(Debug, Clone, Copy)]
pub(crate) struct Git<'a> {
    root: &'a Path,
    index_file: Option<&'a Path>,
}

impl<'a> Git<'a> {
    pub(crate) fn new(root: &'a Path) -> Self {
        Self {
            root,
            index_file: None,
        }
    }

    /// Same repository, but reading and writing an alternate index file
    pub(crate) fn with_index(self, index_file: &'a Path) -> Self {
        Self {
            index_file: Some(index_file),
            ..self
        }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new("git");
        for var in INHERITED_GIT_ENV {
            cmd.env_remove(var);
        }
        if let Some(index) = self.index_file {
            cmd.env("GIT_INDEX_FILE", index);
        }
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .args(["-c", "core.quotepath=false"])
            .args(args)
            .current_dir(self.root);
        cmd
    }

    /// Run and return the raw output regardless of exit status
    pub(crate) fn output<I, S>(&self, args: I) -> Result<Output, RepoError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Ok(self.command(args).output()?)
    }

    /// Run, requiring success, and return stdout bytes
    pub(crate) fn run_bytes<I, S>(&self, args: I) -> Result<Vec<u8>, RepoError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = self.command(args);
        let output = cmd.output()?;
        check(&cmd, output)
    }

    /// Run, requiring success, and return stdout as (lossy) UTF-8
    pub(crate) fn run<I, S>(&self, args: I) -> Result<String, RepoError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let stdout = self.run_bytes(args)?;
        Ok(String::from_utf8_lossy(&stdout).to_string())
    }

    /// Run with `input` piped to stdin
    pub(crate) fn run_with_input<I, S>(&self, args: I, input: &[u8]) -> Result<String, RepoError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = self.command(args);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input)?;
        }
        let output = child.wait_with_output()?;
        let stdout = check(&cmd, output)?;
        Ok(String::from_utf8_lossy(&stdout).to_string())
    }
}

fn check(cmd: &Command, output: Output) -> Result<Vec<u8>, RepoError> {
    if output.status.success() {
        return Ok(output.stdout);
    }
    let command = cmd
        .get_args()
        .skip(2) // -c core.quotepath=false
        .map(|a| a.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ");
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    tracing::debug!(command = %command, stderr = %stderr, "git command failed");
    Err(RepoError::CommandFailed { command, stderr })
}

/// `rel` as a git pathspec that matches it literally (no glob expansion);
/// the empty path is the whole tree
pub(crate) fn literal_pathspec(rel: &Path) -> std::ffi::OsString {
    if rel.as_os_str().is_empty() {
        return std::ffi::OsString::from(".");
    }
    let mut spec = std::ffi::OsString::from(":(literal)");
    spec.push(slash_path(rel));
    spec
}

/// Repository-relative path with `/` separators, as git prints and expects
pub(crate) fn slash_path(rel: &Path) -> std::ffi::OsString {
    let mut out = std::ffi::OsString::new();
    for (i, component) in rel.components().enumerate() {
        if i > 0 {
            out.push("/");
        }
        out.push(component.as_os_str());
    }
    out
}
