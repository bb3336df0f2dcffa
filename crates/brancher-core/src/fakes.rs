//! In-memory git remote and operator (testing only)

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::RepositoryTarget;
use crate::credentials::KeyFile;
use crate::domain::{BaseRef, BranchSpec};
use crate::git::{GitError, GitOperator, GitResult, PushStatus};
use crate::workspace::Workspace;

/// A remote holding branch name → base branch it was cut from.
///
/// Pushes check and insert under one lock, so concurrent pushes of the same
/// name behave like a real remote: one wins, the rest are rejected.
#[derive(Debug)]
pub struct MemoryRemote {
    default_branch: String,
    branches: Mutex<BTreeMap<String, String>>,
    pushes: AtomicUsize,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new("main")
    }
}

impl MemoryRemote {
    pub fn new(default_branch: &str) -> Self {
        let mut branches = BTreeMap::new();
        branches.insert(default_branch.to_string(), String::new());
        Self {
            default_branch: default_branch.to_string(),
            branches: Mutex::new(branches),
            pushes: AtomicUsize::new(0),
        }
    }

    pub fn with_branch(self, name: &str, base: &str) -> Self {
        self.insert(name, base);
        self
    }

    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    pub fn has_branch(&self, name: &str) -> bool {
        self.branches.lock().unwrap().contains_key(name)
    }

    /// Base recorded for `name`, if the branch exists.
    pub fn base_of(&self, name: &str) -> Option<String> {
        self.branches.lock().unwrap().get(name).cloned()
    }

    /// All branch names, default branch included.
    pub fn branches(&self) -> Vec<String> {
        self.branches.lock().unwrap().keys().cloned().collect()
    }

    /// Pushes that created a branch.
    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    fn insert(&self, name: &str, base: &str) -> bool {
        let mut branches = self.branches.lock().unwrap();
        if branches.contains_key(name) {
            return false;
        }
        branches.insert(name.to_string(), base.to_string());
        true
    }
}

/// [`GitOperator`] over a [`MemoryRemote`], with switchable failures.
///
/// The workspace is still used on disk: clone writes `repo/`, create
/// writes `repo/refs/heads/<name>`, so cleanup can be asserted.
#[derive(Debug)]
pub struct FakeGitOperator {
    remote: Arc<MemoryRemote>,
    fail_clone: AtomicBool,
    reject_pushes: AtomicBool,
    race_on_push: AtomicBool,
    clone_delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeGitOperator {
    pub fn new(remote: Arc<MemoryRemote>) -> Self {
        Self {
            remote,
            fail_clone: AtomicBool::new(false),
            reject_pushes: AtomicBool::new(false),
            race_on_push: AtomicBool::new(false),
            clone_delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn remote(&self) -> &Arc<MemoryRemote> {
        &self.remote
    }

    /// Clone writes a partial checkout and then fails.
    pub fn set_fail_clone(&self, fail: bool) {
        self.fail_clone.store(fail, Ordering::SeqCst);
    }

    /// Every push is refused and nothing is inserted.
    pub fn set_reject_pushes(&self, reject: bool) {
        self.reject_pushes.store(reject, Ordering::SeqCst);
    }

    /// Another writer creates the branch just before our push lands.
    pub fn set_race_on_push(&self, race: bool) {
        self.race_on_push.store(race, Ordering::SeqCst);
    }

    /// Clone sleeps this long before doing anything.
    pub fn set_clone_delay(&self, delay: Option<Duration>) {
        *self.clone_delay.lock().unwrap() = delay;
    }

    /// Operation names in call order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == operation)
            .count()
    }

    fn record(&self, operation: &'static str) {
        self.calls.lock().unwrap().push(operation);
    }
}

fn io_failure(command: &str, e: std::io::Error) -> GitError {
    GitError::CommandFailed {
        command: command.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl GitOperator for FakeGitOperator {
    async fn clone_repo(
        &self,
        _target: &RepositoryTarget,
        key: &KeyFile,
        base: &BaseRef,
        into: &Workspace,
    ) -> GitResult<()> {
        self.record("clone");
        let delay = *self.clone_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !key.key_path().exists() {
            return Err(GitError::CloneFailed {
                reason: "Permission denied (publickey)".to_string(),
            });
        }

        let repo = into.repo_dir();
        std::fs::create_dir_all(repo.join("refs/heads")).map_err(|e| GitError::CloneFailed {
            reason: e.to_string(),
        })?;
        if self.fail_clone.load(Ordering::SeqCst) {
            let _ = std::fs::write(repo.join("partial.pack"), b"incomplete");
            return Err(GitError::CloneFailed {
                reason: "early EOF".to_string(),
            });
        }
        if let BaseRef::Named(name) = base {
            if !self.remote.has_branch(name) {
                return Err(GitError::CloneFailed {
                    reason: format!("Remote branch {name} not found in upstream origin"),
                });
            }
        }
        Ok(())
    }

    async fn default_branch(&self, _workspace: &Workspace) -> GitResult<String> {
        self.record("default_branch");
        Ok(self.remote.default_branch().to_string())
    }

    async fn branch_exists(
        &self,
        _workspace: &Workspace,
        _key: &KeyFile,
        spec: &BranchSpec,
    ) -> GitResult<bool> {
        self.record("branch_exists");
        Ok(self.remote.has_branch(&spec.name))
    }

    async fn create_branch(
        &self,
        workspace: &Workspace,
        spec: &BranchSpec,
        base: &str,
    ) -> GitResult<()> {
        self.record("create_branch");
        let path = workspace.repo_dir().join("refs/heads").join(&spec.name);
        std::fs::write(path, base).map_err(|e| io_failure("branch", e))
    }

    async fn push(
        &self,
        workspace: &Workspace,
        _key: &KeyFile,
        spec: &BranchSpec,
    ) -> GitResult<PushStatus> {
        self.record("push");
        let path = workspace.repo_dir().join("refs/heads").join(&spec.name);
        let base = std::fs::read_to_string(path).map_err(|e| io_failure("push", e))?;

        if self.race_on_push.load(Ordering::SeqCst) {
            self.remote.insert(&spec.name, &base);
        }
        if self.reject_pushes.load(Ordering::SeqCst) {
            return Err(GitError::PushRejected {
                reason: "pre-receive hook declined".to_string(),
            });
        }
        if self.remote.insert(&spec.name, &base) {
            self.remote.pushes.fetch_add(1, Ordering::SeqCst);
            Ok(PushStatus::Created)
        } else {
            Err(GitError::PushRejected {
                reason: format!("{} (fetch first)", spec.remote_ref()),
            })
        }
    }
}
