//! Notification Handler: one publish event in, one [`Outcome`] out.
//!
//! Per event: resolve the branch, fetch the deploy key, acquire a workspace,
//! clone, check the remote, create and push when missing, then release the
//! workspace and key. Idempotency comes from deterministic naming plus the
//! remote existence check; no lock is taken. Everything after validation
//! runs under a wall-clock deadline shared by every record of a batch. When
//! it passes, the in-flight future is dropped, which kills git children and
//! removes the workspace and key.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use secret_store::SecretStore;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use crate::config::BrancherConfig;
use crate::credentials::{CredentialProvider, KeyFile};
use crate::domain::{BaseRef, BranchSpec, FailureKind, Outcome, PublishEvent, Stage, ValidationError};
use crate::envelope::{parse_envelope, Notification};
use crate::git::{GitError, GitOperator, PushStatus};
use crate::metrics::METRICS;
use crate::obs;
use crate::resolver::BranchResolver;
use crate::workspace::{Workspace, WorkspaceManager};

/// How a successful run ended.
#[derive(Debug)]
enum Completion {
    Created { base: String },
    AlreadySatisfied,
}

/// A classified failure with the stage it happened in.
#[derive(Debug)]
struct Failure {
    kind: FailureKind,
    stage: Stage,
    message: String,
}

impl Failure {
    fn new(kind: FailureKind, stage: Stage, error: &dyn std::fmt::Display) -> Self {
        Self {
            kind,
            stage,
            message: error.to_string(),
        }
    }
}

/// Last stage reached. Readable after the run future is dropped on timeout.
struct StageTracker(Mutex<Stage>);

impl StageTracker {
    fn new() -> Self {
        Self(Mutex::new(Stage::Start))
    }

    fn advance(&self, stage: Stage) {
        if let Ok(mut current) = self.0.lock() {
            *current = stage;
        }
        obs::emit_stage(stage);
    }

    fn current(&self) -> Stage {
        self.0.lock().map(|s| *s).unwrap_or(Stage::Start)
    }
}

/// Orchestrates resolver, credentials, workspace and git for each event.
pub struct NotificationHandler {
    config: BrancherConfig,
    resolver: BranchResolver,
    credentials: CredentialProvider,
    workspaces: WorkspaceManager,
    git: Arc<dyn GitOperator>,
}

impl NotificationHandler {
    pub fn new(
        config: BrancherConfig,
        secrets: Arc<dyn SecretStore>,
        git: Arc<dyn GitOperator>,
    ) -> Self {
        let resolver = BranchResolver::new(config.base());
        let credentials = CredentialProvider::new(secrets, &config.secret_id);
        let workspaces = WorkspaceManager::new(config.workspace_root.clone());
        Self {
            config,
            resolver,
            credentials,
            workspaces,
            git,
        }
    }

    pub fn config(&self) -> &BrancherConfig {
        &self.config
    }

    pub fn resolver(&self) -> &BranchResolver {
        &self.resolver
    }

    /// Handle a raw envelope within the configured budget.
    pub async fn handle_batch(&self, raw: &str) -> Vec<Outcome> {
        self.handle_batch_within(raw, self.config.timeout).await
    }

    /// Handle a raw envelope, finishing every record within `budget`.
    ///
    /// Records are processed one at a time and independently; a failing
    /// record never affects the others. The budget covers the whole batch,
    /// so records reached after it is spent time out immediately.
    pub async fn handle_batch_within(&self, raw: &str, budget: Duration) -> Vec<Outcome> {
        let deadline = tokio::time::Instant::now() + budget;
        let notifications = match parse_envelope(raw) {
            Ok(notifications) => notifications,
            Err(e) => {
                METRICS.inc_events_received();
                obs::emit_invocation_failed(FailureKind::InvalidEvent, Stage::Start, &e);
                let outcome = Outcome::failed(FailureKind::InvalidEvent, Stage::Start, e.to_string());
                METRICS.record(&outcome);
                return vec![outcome];
            }
        };
        if notifications.is_empty() {
            warn!("envelope contained no records");
        }

        let mut outcomes = Vec::with_capacity(notifications.len());
        for notification in notifications {
            outcomes.push(self.handle_notification(notification, deadline).await);
        }
        outcomes
    }

    /// Handle one already-decoded event with the configured budget.
    pub async fn handle_event(&self, event: &PublishEvent) -> Outcome {
        let notification = Notification {
            message_id: None,
            event: Ok(event.clone()),
        };
        let deadline = tokio::time::Instant::now() + self.config.timeout;
        self.handle_notification(notification, deadline).await
    }

    async fn handle_notification(
        &self,
        notification: Notification,
        deadline: tokio::time::Instant,
    ) -> Outcome {
        let invocation_id = Uuid::new_v4().to_string();
        let span = obs::invocation_span(&invocation_id, notification.message_id.as_deref());
        self.process(notification.event, deadline)
            .instrument(span)
            .await
    }

    async fn process(
        &self,
        event: Result<PublishEvent, ValidationError>,
        deadline: tokio::time::Instant,
    ) -> Outcome {
        METRICS.inc_events_received();
        let started = Instant::now();

        let resolved = event.and_then(|event| {
            obs::emit_invocation_started(&event.package_name, &event.version);
            self.resolver.resolve(&event)
        });

        let outcome = match resolved {
            Ok(spec) => self.run_until(&spec, deadline).await,
            Err(e) => {
                obs::emit_invocation_failed(FailureKind::InvalidEvent, Stage::Start, &e);
                Outcome::failed(FailureKind::InvalidEvent, Stage::Start, e.to_string())
            }
        };

        METRICS.record(&outcome);
        obs::emit_invocation_finished(outcome.status(), started.elapsed().as_millis() as u64);
        outcome
    }

    async fn run_until(&self, spec: &BranchSpec, deadline: tokio::time::Instant) -> Outcome {
        obs::emit_branch_resolved(&spec.name, &spec.base_ref);
        let tracker = StageTracker::new();

        match tokio::time::timeout_at(deadline, self.execute(spec, &tracker)).await {
            Ok(Ok(Completion::Created { base })) => {
                obs::emit_branch_created(&spec.name, &base);
                Outcome::Success {
                    branch: spec.name.clone(),
                    base,
                }
            }
            Ok(Ok(Completion::AlreadySatisfied)) => {
                obs::emit_already_satisfied(&spec.name);
                Outcome::AlreadySatisfied {
                    branch: spec.name.clone(),
                }
            }
            Ok(Err(failure)) => {
                obs::emit_invocation_failed(failure.kind, failure.stage, &failure.message);
                Outcome::Failed {
                    kind: failure.kind,
                    stage: failure.stage,
                    message: failure.message,
                    branch: Some(spec.name.clone()),
                }
            }
            Err(_elapsed) => {
                let stage = tracker.current();
                let message = format!("deadline passed after reaching {stage}");
                obs::emit_invocation_failed(FailureKind::Timeout, stage, &message);
                Outcome::Failed {
                    kind: FailureKind::Timeout,
                    stage,
                    message,
                    branch: Some(spec.name.clone()),
                }
            }
        }
    }

    /// Credential → workspace → git, with both resources released on every
    /// path that returns.
    async fn execute(
        &self,
        spec: &BranchSpec,
        tracker: &StageTracker,
    ) -> Result<Completion, Failure> {
        let key = self
            .credentials
            .fetch()
            .await
            .map_err(|e| Failure::new(e.failure_kind(), tracker.current(), &e))?;
        let key_file = KeyFile::materialize(
            &key,
            self.config.known_hosts.as_deref(),
            self.workspaces.root(),
        )
        .map_err(|e| Failure::new(e.failure_kind(), tracker.current(), &e))?;
        drop(key);
        tracker.advance(Stage::CredentialFetched);

        let result = match self.workspaces.acquire() {
            Ok(workspace) => {
                let result = self.branch(spec, &key_file, &workspace, tracker).await;
                self.workspaces.release(workspace);
                result
            }
            Err(e) => Err(Failure::new(e.failure_kind(), tracker.current(), &e)),
        };

        if let Err(e) = key_file.destroy() {
            obs::emit_cleanup_failed("deploy_key", &e);
        }
        tracker.advance(Stage::Cleaned);
        result
    }

    async fn branch(
        &self,
        spec: &BranchSpec,
        key: &KeyFile,
        workspace: &Workspace,
        tracker: &StageTracker,
    ) -> Result<Completion, Failure> {
        let fail = |e: GitError| Failure::new(e.failure_kind(), tracker.current(), &e);
        let git = self.git.as_ref();

        git.clone_repo(&self.config.repository, key, &spec.base_ref, workspace)
            .await
            .map_err(fail)?;
        tracker.advance(Stage::Cloned);

        let base = match &spec.base_ref {
            BaseRef::Named(name) => name.clone(),
            BaseRef::RemoteDefault => git.default_branch(workspace).await.map_err(fail)?,
        };

        let exists = git
            .branch_exists(workspace, key, spec)
            .await
            .map_err(fail)?;
        tracker.advance(Stage::BranchChecked);
        if exists {
            tracker.advance(Stage::AlreadySatisfied);
            return Ok(Completion::AlreadySatisfied);
        }

        git.create_branch(workspace, spec, &base)
            .await
            .map_err(fail)?;

        match git.push(workspace, key, spec).await {
            Ok(PushStatus::Created) => {
                tracker.advance(Stage::BranchCreatedAndPushed);
                Ok(Completion::Created { base })
            }
            Ok(PushStatus::UpToDate) => {
                tracker.advance(Stage::AlreadySatisfied);
                Ok(Completion::AlreadySatisfied)
            }
            Err(GitError::PushRejected { reason }) => {
                // Another invocation may have created the branch between our
                // check and our push. If it exists now, the goal holds.
                match git.branch_exists(workspace, key, spec).await {
                    Ok(true) => {
                        debug!(reason = %reason, "push rejected but branch now exists");
                        tracker.advance(Stage::AlreadySatisfied);
                        Ok(Completion::AlreadySatisfied)
                    }
                    _ => Err(fail(GitError::PushRejected { reason })),
                }
            }
            Err(e) => Err(fail(e)),
        }
    }
}

/// Whether a batch must be redelivered: any failure that a retry can fix.
pub fn requires_redelivery(outcomes: &[Outcome]) -> bool {
    outcomes.iter().any(Outcome::is_retryable_failure)
}
