//! Handler configuration.
//!
//! Built explicitly and passed to
//! [`NotificationHandler`](crate::handler::NotificationHandler) at
//! construction; nothing is read from ambient state at invocation time.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::BaseRef;

/// Secret holding the deploy key when none is configured.
pub const DEFAULT_SECRET_ID: &str = "auto-brancher/deploy-key";

/// Wall-clock budget per invocation when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// The SSH remote branches are pushed to. Fixed at deployment time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryTarget {
    url: String,
}

impl RepositoryTarget {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim().to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Display for RepositoryTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

/// Everything the handler needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct BrancherConfig {
    /// Remote repository URL.
    pub repository: RepositoryTarget,
    /// Secret store identifier of the deploy key.
    pub secret_id: String,
    /// Wall-clock budget for one invocation.
    pub timeout: Duration,
    /// Base branch override; `None` follows the remote default.
    pub base_ref: Option<String>,
    /// Parent directory for workspaces and key files.
    pub workspace_root: Option<PathBuf>,
    /// Pinned known_hosts file; enables strict host key checking.
    pub known_hosts: Option<PathBuf>,
    /// git binary to run.
    pub git_program: String,
}

impl BrancherConfig {
    pub fn new(repository: &str) -> Self {
        Self {
            repository: RepositoryTarget::new(repository),
            secret_id: DEFAULT_SECRET_ID.to_string(),
            timeout: DEFAULT_TIMEOUT,
            base_ref: None,
            workspace_root: None,
            known_hosts: None,
            git_program: "git".to_string(),
        }
    }

    /// Read settings from the process environment.
    ///
    /// `REPOSITORY` is required. Optional: `SECRET_ID`,
    /// `BRANCHER_TIMEOUT_SECS`, `BRANCHER_BASE_REF`,
    /// `BRANCHER_WORKSPACE_ROOT`, `BRANCHER_KNOWN_HOSTS`, `BRANCHER_GIT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let repository = get("REPOSITORY").ok_or(ConfigError::Missing("REPOSITORY"))?;
        let mut config = Self::new(&repository);

        if let Some(secret_id) = get("SECRET_ID") {
            config.secret_id = secret_id;
        }
        if let Some(raw) = get("BRANCHER_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "BRANCHER_TIMEOUT_SECS",
                reason: format!("{raw:?} is not a whole number of seconds"),
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        config.base_ref = get("BRANCHER_BASE_REF");
        config.workspace_root = get("BRANCHER_WORKSPACE_ROOT").map(PathBuf::from);
        config.known_hosts = get("BRANCHER_KNOWN_HOSTS").map(PathBuf::from);
        if let Some(git) = get("BRANCHER_GIT") {
            config.git_program = git;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_secret_id(mut self, secret_id: &str) -> Self {
        self.secret_id = secret_id.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_base_ref(mut self, base_ref: &str) -> Self {
        self.base_ref = Some(base_ref.to_string());
        self
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    pub fn with_git_program(mut self, program: &str) -> Self {
        self.git_program = program.to_string();
        self
    }

    /// The base ref the resolver stamps on every branch spec.
    pub fn base(&self) -> BaseRef {
        match &self.base_ref {
            Some(name) => BaseRef::Named(name.clone()),
            None => BaseRef::RemoteDefault,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repository.url().is_empty() {
            return Err(ConfigError::Missing("REPOSITORY"));
        }
        if self.secret_id.trim().is_empty() {
            return Err(ConfigError::Missing("SECRET_ID"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "BRANCHER_TIMEOUT_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }
        if let Some(base) = &self.base_ref {
            if base.starts_with('-') || base.contains("..") || base.contains(char::is_whitespace)
            {
                return Err(ConfigError::Invalid {
                    key: "BRANCHER_BASE_REF",
                    reason: format!("{base:?} is not a usable branch name"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config =
            BrancherConfig::from_lookup(lookup(&[("REPOSITORY", "git@github.com:org/repo.git")]))
                .unwrap();
        assert_eq!(config.repository.url(), "git@github.com:org/repo.git");
        assert_eq!(config.secret_id, DEFAULT_SECRET_ID);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.base(), BaseRef::RemoteDefault);
        assert_eq!(config.git_program, "git");
    }

    #[test]
    fn test_overrides() {
        let config = BrancherConfig::from_lookup(lookup(&[
            ("REPOSITORY", "git@github.com:org/repo.git"),
            ("SECRET_ID", "arn:secret:deploy"),
            ("BRANCHER_TIMEOUT_SECS", "45"),
            ("BRANCHER_BASE_REF", "develop"),
            ("BRANCHER_WORKSPACE_ROOT", "/tmp/ws"),
            ("BRANCHER_KNOWN_HOSTS", "/etc/ssh/known_hosts"),
            ("BRANCHER_GIT", "/opt/git/bin/git"),
        ]))
        .unwrap();
        assert_eq!(config.secret_id, "arn:secret:deploy");
        assert_eq!(config.timeout, Duration::from_secs(45));
        assert_eq!(config.base(), BaseRef::Named("develop".to_string()));
        assert_eq!(config.workspace_root, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(config.known_hosts, Some(PathBuf::from("/etc/ssh/known_hosts")));
        assert_eq!(config.git_program, "/opt/git/bin/git");
    }

    #[test]
    fn test_missing_repository() {
        let err = BrancherConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("REPOSITORY"));

        let err = BrancherConfig::from_lookup(lookup(&[("REPOSITORY", "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("REPOSITORY"));
    }

    #[test]
    fn test_invalid_timeout() {
        let err = BrancherConfig::from_lookup(lookup(&[
            ("REPOSITORY", "git@github.com:org/repo.git"),
            ("BRANCHER_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "BRANCHER_TIMEOUT_SECS", .. }));

        let err = BrancherConfig::new("git@github.com:org/repo.git")
            .with_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_invalid_base_ref() {
        let err = BrancherConfig::new("git@github.com:org/repo.git")
            .with_base_ref("--upload-pack=evil")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "BRANCHER_BASE_REF", .. }));
    }
}
