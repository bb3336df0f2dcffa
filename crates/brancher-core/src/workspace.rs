//! Repository Workspace: one private directory per invocation.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::domain::FailureKind;
use crate::obs;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace under {root}: {source}")]
    Create {
        root: String,
        #[source]
        source: std::io::Error,
    },
}

impl WorkspaceError {
    pub fn failure_kind(&self) -> FailureKind {
        FailureKind::Workspace
    }
}

/// An invocation-scoped directory. Removed on drop if never released.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where the clone lives.
    pub fn repo_dir(&self) -> PathBuf {
        self.dir.path().join("repo")
    }
}

/// Hands out fresh workspaces under an optional root directory.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceManager {
    root: Option<PathBuf>,
}

impl WorkspaceManager {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Create a new, empty workspace. Never reused, never shared.
    pub fn acquire(&self) -> Result<Workspace, WorkspaceError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("auto-brancher-ws-");
        let created = match &self.root {
            Some(root) => {
                std::fs::create_dir_all(root).and_then(|_| builder.tempdir_in(root))
            }
            None => builder.tempdir(),
        };
        let dir = created.map_err(|source| WorkspaceError::Create {
            root: self
                .root
                .as_deref()
                .map(|r| r.display().to_string())
                .unwrap_or_else(|| std::env::temp_dir().display().to_string()),
            source,
        })?;
        debug!(path = %dir.path().display(), "workspace acquired");
        Ok(Workspace { dir })
    }

    /// Recursively remove the workspace, including any partial clone.
    ///
    /// Removal errors are logged; the invocation outcome does not change.
    pub fn release(&self, workspace: Workspace) {
        let path = workspace.path().display().to_string();
        match workspace.dir.close() {
            Ok(()) => debug!(path = %path, "workspace released"),
            Err(e) => obs::emit_cleanup_failed("workspace", &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_creates_distinct_dirs() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(Some(root.path().to_path_buf()));
        let a = manager.acquire().unwrap();
        let b = manager.acquire().unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(root.path()));
        assert_eq!(a.repo_dir(), a.path().join("repo"));
    }

    #[test]
    fn test_release_removes_partial_clone() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(Some(root.path().to_path_buf()));
        let ws = manager.acquire().unwrap();
        std::fs::create_dir_all(ws.repo_dir().join(".git/objects")).unwrap();
        std::fs::write(ws.repo_dir().join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();

        manager.release(ws);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_drop_without_release_still_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(Some(root.path().to_path_buf()));
        let ws = manager.acquire().unwrap();
        let path = ws.path().to_path_buf();
        drop(ws);
        assert!(!path.exists());
    }

    #[test]
    fn test_acquire_creates_missing_root() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("nested/workspaces");
        let manager = WorkspaceManager::new(Some(root.clone()));
        let ws = manager.acquire().unwrap();
        assert!(ws.path().starts_with(&root));
    }

    #[test]
    fn test_acquire_fails_when_root_is_a_file() {
        let parent = tempfile::tempdir().unwrap();
        let file = parent.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();
        let manager = WorkspaceManager::new(Some(file));
        let err = manager.acquire().unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Workspace);
    }
}
