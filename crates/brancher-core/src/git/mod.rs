//! Git Operator: clone, existence check, branch creation and push.
//!
//! [`GitOperator`] is the seam between the handler and the outside world.
//! [`GitCli`] drives the system `git` binary; tests substitute
//! [`FakeGitOperator`](crate::fakes::FakeGitOperator).

mod cli;

use async_trait::async_trait;

use crate::config::RepositoryTarget;
use crate::credentials::KeyFile;
use crate::domain::{BaseRef, BranchSpec, FailureKind};
use crate::workspace::Workspace;

pub use cli::{parse_push_porcelain, GitCli, PorcelainStatus};

/// Errors produced by git operations, classified for the handler.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("clone failed: {reason}")]
    CloneFailed { reason: String },

    #[error("push rejected: {reason}")]
    PushRejected { reason: String },

    #[error("git {command} failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("failed to spawn git {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl GitError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            GitError::CloneFailed { .. } => FailureKind::CloneFailed,
            GitError::PushRejected { .. } => FailureKind::PushRejected,
            GitError::CommandFailed { .. } | GitError::Spawn { .. } => FailureKind::GitFailed,
        }
    }
}

/// Result type for git operations.
pub type GitResult<T> = std::result::Result<T, GitError>;

/// What a successful push did on the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    /// The ref was created (or advanced) by this push.
    Created,
    /// The remote already held the identical ref; nothing changed.
    UpToDate,
}

/// Remote operations used by the handler, in call order.
#[async_trait]
pub trait GitOperator: Send + Sync {
    /// Clone `target` into `into.repo_dir()`. For [`BaseRef::Named`] only
    /// that branch is fetched.
    async fn clone_repo(
        &self,
        target: &RepositoryTarget,
        key: &KeyFile,
        base: &BaseRef,
        into: &Workspace,
    ) -> GitResult<()>;

    /// Branch the remote's `HEAD` points at.
    async fn default_branch(&self, workspace: &Workspace) -> GitResult<String>;

    /// Ask the remote (not the clone) whether `spec.name` exists.
    async fn branch_exists(
        &self,
        workspace: &Workspace,
        key: &KeyFile,
        spec: &BranchSpec,
    ) -> GitResult<bool>;

    /// Create the local branch from `origin/<base>`.
    async fn create_branch(
        &self,
        workspace: &Workspace,
        spec: &BranchSpec,
        base: &str,
    ) -> GitResult<()>;

    /// Push the new branch without force.
    async fn push(
        &self,
        workspace: &Workspace,
        key: &KeyFile,
        spec: &BranchSpec,
    ) -> GitResult<PushStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_error_classification() {
        let clone = GitError::CloneFailed {
            reason: "Permission denied (publickey)".to_string(),
        };
        assert_eq!(clone.failure_kind(), FailureKind::CloneFailed);

        let push = GitError::PushRejected {
            reason: "fetch first".to_string(),
        };
        assert_eq!(push.failure_kind(), FailureKind::PushRejected);

        let cmd = GitError::CommandFailed {
            command: "ls-remote".to_string(),
            reason: "Connection reset".to_string(),
        };
        assert_eq!(cmd.failure_kind(), FailureKind::GitFailed);
        assert!(cmd.to_string().contains("git ls-remote failed"));
    }
}
