use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during scoped repository operations
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Repository not initialized at {0}")]
    NotInitialized(PathBuf),

    #[error("Path {path} is outside repository scope {scope}")]
    PathViolation { path: PathBuf, scope: PathBuf },

    #[error("Commit conflict: HEAD moved from {expected} to {actual}")]
    CommitConflict { expected: String, actual: String },

    #[error("Revision not found: {0}")]
    RevisionNotFound(String),

    #[error("Invalid revision: {0:?}")]
    InvalidRevision(String),

    #[error("Git command failed: git {command}: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Failed to parse git output: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Placeholder used in conflict messages for an unborn branch
pub(crate) const UNBORN: &str = "(unborn)";

impl RepoError {
    pub(crate) fn conflict(expected: Option<&str>, actual: Option<&str>) -> Self {
        RepoError::CommitConflict {
            expected: expected.unwrap_or(UNBORN).to_string(),
            actual: actual.unwrap_or(UNBORN).to_string(),
        }
    }
}
