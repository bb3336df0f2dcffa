//! Invocation outcomes and the per-invocation state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why an invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Malformed or unvalidatable input.
    InvalidEvent,
    /// Secret store failure or unusable key material.
    CredentialUnavailable,
    /// Clone failed (network, auth, host key).
    CloneFailed,
    /// Remote refused the branch push and the branch is still absent.
    PushRejected,
    /// A local git step or remote ref query failed.
    GitFailed,
    /// The workspace could not be created.
    Workspace,
    /// The wall-clock budget expired.
    Timeout,
}

impl FailureKind {
    /// Whether redelivering the same event can succeed.
    pub fn is_retryable(self) -> bool {
        !matches!(self, FailureKind::InvalidEvent)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::InvalidEvent => "invalid_event",
            FailureKind::CredentialUnavailable => "credential_unavailable",
            FailureKind::CloneFailed => "clone_failed",
            FailureKind::PushRejected => "push_rejected",
            FailureKind::GitFailed => "git_failed",
            FailureKind::Workspace => "workspace",
            FailureKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress through one invocation.
///
/// `Start → CredentialFetched → Cloned → BranchChecked →
/// {BranchCreatedAndPushed | AlreadySatisfied} → Cleaned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    CredentialFetched,
    Cloned,
    BranchChecked,
    BranchCreatedAndPushed,
    AlreadySatisfied,
    Cleaned,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Start => "start",
            Stage::CredentialFetched => "credential_fetched",
            Stage::Cloned => "cloned",
            Stage::BranchChecked => "branch_checked",
            Stage::BranchCreatedAndPushed => "branch_created_and_pushed",
            Stage::AlreadySatisfied => "already_satisfied",
            Stage::Cleaned => "cleaned",
        };
        f.write_str(s)
    }
}

/// Terminal result of handling one notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The branch was created from `base` and pushed.
    Success { branch: String, base: String },
    /// The branch already existed on the remote; nothing was mutated.
    AlreadySatisfied { branch: String },
    /// The invocation failed at `stage`.
    Failed {
        kind: FailureKind,
        stage: Stage,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
    },
}

impl Outcome {
    pub fn failed(kind: FailureKind, stage: Stage, message: impl Into<String>) -> Self {
        Outcome::Failed {
            kind,
            stage,
            message: message.into(),
            branch: None,
        }
    }

    /// Success and already-satisfied both mean the branch exists.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. } | Outcome::AlreadySatisfied { .. })
    }

    /// A failure the transport should redeliver.
    pub fn is_retryable_failure(&self) -> bool {
        matches!(self, Outcome::Failed { kind, .. } if kind.is_retryable())
    }

    /// Stable status label, matching the serialized `status` tag.
    pub fn status(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "success",
            Outcome::AlreadySatisfied { .. } => "already_satisfied",
            Outcome::Failed { .. } => "failed",
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn branch(&self) -> Option<&str> {
        match self {
            Outcome::Success { branch, .. } | Outcome::AlreadySatisfied { branch } => Some(branch),
            Outcome::Failed { branch, .. } => branch.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_invalid_event_is_terminal() {
        assert!(!FailureKind::InvalidEvent.is_retryable());
        for kind in [
            FailureKind::CredentialUnavailable,
            FailureKind::CloneFailed,
            FailureKind::PushRejected,
            FailureKind::GitFailed,
            FailureKind::Workspace,
            FailureKind::Timeout,
        ] {
            assert!(kind.is_retryable(), "{kind} should be retryable");
        }
    }

    #[test]
    fn test_outcome_json_shape() {
        let outcome = Outcome::Success {
            branch: "rds-tools-1-2-0".to_string(),
            base: "main".to_string(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["branch"], "rds-tools-1-2-0");

        let failed = Outcome::failed(FailureKind::Timeout, Stage::Cloned, "budget exceeded");
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["stage"], "cloned");
        assert!(json.get("branch").is_none());
    }

    #[test]
    fn test_outcome_predicates() {
        let satisfied = Outcome::AlreadySatisfied {
            branch: "x-1-0-0".to_string(),
        };
        assert!(satisfied.is_success());
        assert!(!satisfied.is_retryable_failure());
        assert_eq!(satisfied.branch(), Some("x-1-0-0"));

        let invalid = Outcome::failed(FailureKind::InvalidEvent, Stage::Start, "bad");
        assert!(!invalid.is_success());
        assert!(!invalid.is_retryable_failure());
        assert_eq!(invalid.failure_kind(), Some(FailureKind::InvalidEvent));
    }

    #[test]
    fn test_stage_order_follows_invocation() {
        assert!(Stage::Start < Stage::CredentialFetched);
        assert!(Stage::Cloned < Stage::BranchChecked);
        assert!(Stage::BranchChecked < Stage::Cleaned);
    }
}
