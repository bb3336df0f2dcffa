//! Structured observability hooks for invocation lifecycle events.
//!
//! Every invocation runs inside [`invocation_span`]; the `emit_*` functions
//! log one event per lifecycle transition with a stable `event` field so log
//! pipelines can filter on it. Key material never reaches these functions.

use tracing::{info, warn, Span};

use crate::domain::{FailureKind, Stage};

/// Span tagged with the invocation id and, when known, the bus message id.
pub fn invocation_span(invocation_id: &str, message_id: Option<&str>) -> Span {
    tracing::info_span!(
        "brancher.invocation",
        invocation_id = %invocation_id,
        message_id = message_id.unwrap_or("-"),
    )
}

/// Emit event: a notification was picked up.
pub fn emit_invocation_started(package_name: &str, version: &str) {
    info!(event = "invocation.started", package_name = %package_name, version = %version);
}

/// Emit event: the branch spec was computed.
pub fn emit_branch_resolved(branch: &str, base: &dyn std::fmt::Display) {
    info!(event = "branch.resolved", branch = %branch, base = %base);
}

/// Emit event: state machine transition (debug level).
pub fn emit_stage(stage: Stage) {
    tracing::debug!(event = "invocation.stage", stage = %stage);
}

/// Emit event: branch created and pushed.
pub fn emit_branch_created(branch: &str, base: &str) {
    info!(event = "branch.created", branch = %branch, base = %base);
}

/// Emit event: branch already existed remotely.
pub fn emit_already_satisfied(branch: &str) {
    info!(event = "branch.already_satisfied", branch = %branch);
}

/// Emit event: invocation failed (warning level).
pub fn emit_invocation_failed(kind: FailureKind, stage: Stage, error: &dyn std::fmt::Display) {
    warn!(
        event = "invocation.failed",
        kind = %kind,
        stage = %stage,
        retryable = kind.is_retryable(),
        error = %error,
    );
}

/// Emit event: invocation finished.
pub fn emit_invocation_finished(status: &str, duration_ms: u64) {
    info!(event = "invocation.finished", status = %status, duration_ms = duration_ms);
}

/// Emit event: a scoped resource could not be removed (warning level).
pub fn emit_cleanup_failed(resource: &str, error: &dyn std::fmt::Display) {
    warn!(event = "cleanup.failed", resource = %resource, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_span_create() {
        let span = invocation_span("inv-1", Some("msg-1"));
        let _entered = span.enter();
        emit_stage(Stage::Start);
    }
}
