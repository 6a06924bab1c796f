//! Checkpoint commits driven by workflow state.
//!
//! Hook handlers call [`run_checkpoint`] at phase transitions: it reads the
//! workflow's phase from the state store, commits pending tooling changes,
//! and records what happened back into the store.

use std::path::Path;

use thiserror::Error;

use crate::data::{StateAccessor, StateError, StateStore};
use crate::git::{CommitResult, CommitSettings, RepoError, ToolingRepository};

/// Author recorded for checkpoint bookkeeping writes
pub const CHECKPOINT_AUTHOR: &str = "checkpoint";

pub const LAST_SHA_KEY: &str = "checkpoint.last_sha";
pub const LAST_AT_KEY: &str = "checkpoint.last_at";
pub const COUNT_KEY: &str = "checkpoint.count";

/// Errors that can occur while taking a checkpoint
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("No action given and no phase recorded for workflow {0}")]
    MissingAction(String),
}

/// What to checkpoint
#[derive(Debug, Clone, Copy)]
pub struct CheckpointRequest<'a> {
    pub workflow: &'a str,
    /// Explicit action; when absent the workflow's recorded phase is used
    pub action: Option<&'a str>,
    pub session_id: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointOutcome {
    Committed(CommitResult),
    /// The tooling tree was clean
    NoChanges,
    /// The tooling repository does not exist; nothing was attempted
    Skipped { reason: String },
}

/// State key holding a workflow's current phase
pub fn phase_key(workflow: &str) -> String {
    format!("workflow.{workflow}.phase")
}

/// Take a checkpoint commit in the tooling repository of `project_dir`
pub fn run_checkpoint(
    store: &dyn StateStore,
    project_dir: &Path,
    request: CheckpointRequest<'_>,
    settings: &CommitSettings,
) -> Result<CheckpointOutcome, CheckpointError> {
    let state = StateAccessor::new(store, CHECKPOINT_AUTHOR);
    let action = resolve_action(&state, &request)?;

    let repo = match ToolingRepository::open_with(project_dir, settings.clone()) {
        Ok(repo) => repo,
        Err(RepoError::NotInitialized(path)) => {
            tracing::info!(
                path = %path.display(),
                workflow = %request.workflow,
                "Tooling repository not initialized; skipping checkpoint"
            );
            return Ok(CheckpointOutcome::Skipped {
                reason: format!("tooling repository not initialized at {}", path.display()),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let result = match repo.checkpoint(request.workflow, &action, request.session_id) {
        Err(RepoError::CommitConflict { expected, actual }) => {
            tracing::warn!(
                expected = %expected,
                actual = %actual,
                "Checkpoint raced another commit; retrying"
            );
            repo.checkpoint(request.workflow, &action, request.session_id)?
        }
        other => other?,
    };
    repo.close();

    let Some(sha) = result.sha.as_deref() else {
        return Ok(CheckpointOutcome::NoChanges);
    };
    state.set(LAST_SHA_KEY, sha)?;
    state.set_timestamp(LAST_AT_KEY)?;
    state.increment(COUNT_KEY, 1)?;

    Ok(CheckpointOutcome::Committed(result))
}

fn resolve_action(
    state: &StateAccessor<'_>,
    request: &CheckpointRequest<'_>,
) -> Result<String, CheckpointError> {
    if let Some(action) = request.action.filter(|a| !a.trim().is_empty()) {
        return Ok(action.to_string());
    }
    match state.get(&phase_key(request.workflow))? {
        Some(phase) if !phase.is_null() => Ok(phase.to_string()),
        _ => Err(CheckpointError::MissingAction(request.workflow.to_string())),
    }
}
