// Error taxonomy for the repair loop
//
// Guard rejections and environment failures are recoverable and handled by the
// controller; the rest abort the run and surface to the caller.

use std::path::PathBuf;
use thiserror::Error;

use crate::patcher::GuardRejection;

#[derive(Debug, Error)]
pub enum FixerError {
    /// Workspace root or application subtree missing/unreadable (fatal, before any iteration)
    #[error("workspace unreadable at {path}: {reason}")]
    WorkspaceUnreadable { path: PathBuf, reason: String },

    /// Proposal failed validation; nothing was written
    #[error("patch rejected ({reason}): {detail}")]
    PatchGuardRejected {
        reason: GuardRejection,
        detail: String,
    },

    /// Writing an accepted patch failed; the checkpoint has already been restored
    #[error("failed to write {path}: {reason}")]
    WorkspaceWrite { path: PathBuf, reason: String },

    /// Test suite could not produce a verdict (timeout, crash, spawn failure)
    #[error("test environment failure: {0}")]
    EnvironmentFailure(String),

    /// Heuristic store write failed; the previous durable copy is intact
    #[error("failed to persist heuristic store at {path}: {reason}")]
    StorePersistenceFailure { path: PathBuf, reason: String },

    /// Another run holds the workspace lock
    #[error("another run holds the workspace lock at {}", .0.display())]
    WorkspaceBusy(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl FixerError {
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::WorkspaceUnreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::StorePersistenceFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors the controller recovers from inside an iteration
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FixerError::PatchGuardRejected { .. } | FixerError::EnvironmentFailure(_)
        )
    }
}

pub type FixerResult<T> = std::result::Result<T, FixerError>;
