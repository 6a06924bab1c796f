//! Git operations module
//!
//! Scoped views over git working trees. [`ToolingRepository`] owns the
//! nested `.trellis` repository; [`ProjectRepository`] sees the enclosing
//! project with `.trellis` carved out. All git access goes through the
//! `git` binary.

mod command;
mod error;
mod path_scope;
mod project;
mod repo;
mod status;
mod tooling;

pub use error::RepoError;
pub use project::{validate_revision, ProjectRepository};
pub use repo::{RepoHandle, ScopedRepository};
pub use status::{BlameLine, CommitInfo, CommitResult, DiffStats, DiscardResult, RepoStatus};
pub use tooling::{tooling_root, CommitSettings, ToolingRepository, TOOLING_DIR};
