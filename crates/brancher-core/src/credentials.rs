//! Credential Provider: deploy key fetch and materialization.
//!
//! The key is fetched fresh on every invocation and never cached, logged or
//! written anywhere except a private temporary directory that is removed when
//! the [`KeyFile`] is dropped or destroyed.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::zeroize::Zeroizing;
use secrecy::{ExposeSecret, SecretString};
use secret_store::{SecretError, SecretStore};
use tempfile::TempDir;
use tracing::{debug, instrument};

use crate::domain::FailureKind;

/// Errors from the credential layer. All map to
/// [`FailureKind::CredentialUnavailable`].
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("secret store failure: {0}")]
    Store(#[from] SecretError),

    #[error("secret is not a PEM private key: {0}")]
    Malformed(String),

    #[error("failed to materialize deploy key: {0}")]
    Materialize(#[from] std::io::Error),
}

impl CredentialError {
    pub fn failure_kind(&self) -> FailureKind {
        FailureKind::CredentialUnavailable
    }
}

// ---------------------------------------------------------------------------
// DeployKey
// ---------------------------------------------------------------------------

/// A validated PEM private key held in memory.
///
/// The PEM text lives in a [`SecretString`], zeroized on drop.
pub struct DeployKey {
    pem: SecretString,
    label: String,
}

impl DeployKey {
    /// Validate and normalize PEM text.
    ///
    /// Accepts `-----BEGIN <X>PRIVATE KEY-----` blocks with a matching END
    /// footer. Values stored with literal `\n` escapes are unescaped and a
    /// trailing newline is ensured, since `ssh` refuses keys without one.
    /// Passphrase-protected keys are refused: `ssh` runs in batch mode and
    /// could never unlock them.
    pub fn from_pem(raw: &str) -> Result<Self, CredentialError> {
        let trimmed = raw.trim();
        let unescaped = if !trimmed.contains('\n') && trimmed.contains("\\n") {
            Zeroizing::new(trimmed.replace("\\n", "\n"))
        } else {
            Zeroizing::new(trimmed.to_string())
        };
        let text = Zeroizing::new(unescaped.replace("\r\n", "\n"));

        let first = text.lines().next().unwrap_or_default().trim();
        let label = first
            .strip_prefix("-----BEGIN ")
            .and_then(|rest| rest.strip_suffix("-----"))
            .filter(|label| label.ends_with("PRIVATE KEY"))
            .ok_or_else(|| {
                CredentialError::Malformed("missing BEGIN PRIVATE KEY header".to_string())
            })?
            .to_string();

        let footer = format!("-----END {label}-----");
        let last = text.lines().last().unwrap_or_default().trim();
        if last != footer {
            return Err(CredentialError::Malformed(format!(
                "missing {footer} footer"
            )));
        }

        let body: Vec<&str> = text
            .lines()
            .skip(1)
            .take_while(|line| line.trim() != footer)
            .filter(|line| !line.trim().is_empty())
            .collect();
        if body.is_empty() {
            return Err(CredentialError::Malformed("empty key body".to_string()));
        }

        let encrypted = label.starts_with("ENCRYPTED ")
            || body
                .iter()
                .any(|line| line.starts_with("Proc-Type:") && line.contains("ENCRYPTED"));
        if encrypted {
            return Err(CredentialError::Malformed(
                "key is passphrase-protected".to_string(),
            ));
        }

        let mut pem = Zeroizing::new(String::with_capacity(text.len() + 1));
        pem.push_str(&text);
        pem.push('\n');
        let pem = SecretString::from(Box::<str>::from(pem.as_str()));
        Ok(Self { pem, label })
    }

    /// PEM label, e.g. `OPENSSH PRIVATE KEY`. Safe to log.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.pem.expose_secret().as_bytes()
    }
}

impl std::fmt::Debug for DeployKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployKey")
            .field("label", &self.label)
            .field("pem", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// CredentialProvider
// ---------------------------------------------------------------------------

/// Fetches the deploy key from a [`SecretStore`].
#[derive(Clone)]
pub struct CredentialProvider {
    store: Arc<dyn SecretStore>,
    secret_id: String,
}

impl CredentialProvider {
    pub fn new(store: Arc<dyn SecretStore>, secret_id: &str) -> Self {
        Self {
            store,
            secret_id: secret_id.to_string(),
        }
    }

    pub fn secret_id(&self) -> &str {
        &self.secret_id
    }

    /// Fetch and validate the current key. Never cached.
    #[instrument(skip(self), fields(secret_id = %self.secret_id, backend = self.store.backend()))]
    pub async fn fetch(&self) -> Result<DeployKey, CredentialError> {
        let secret = self.store.get_secret(&self.secret_id).await?;
        let key = DeployKey::from_pem(secret.expose())?;
        debug!(label = key.label(), "deploy key fetched");
        Ok(key)
    }
}

// ---------------------------------------------------------------------------
// KeyFile
// ---------------------------------------------------------------------------

/// A deploy key written to disk for `ssh`.
///
/// Lives in its own `0700` directory holding the `0600` key and a
/// `known_hosts` file. The directory is removed on drop.
#[derive(Debug)]
pub struct KeyFile {
    dir: TempDir,
    key_path: PathBuf,
    known_hosts_path: PathBuf,
    strict_host_keys: bool,
}

impl KeyFile {
    /// Write `key` under `parent` (or the system temp dir).
    ///
    /// With `known_hosts`, that file is copied in and host keys are checked
    /// strictly. Without it, unknown hosts are accepted into the ephemeral
    /// file and changed keys are still refused.
    pub fn materialize(
        key: &DeployKey,
        known_hosts: Option<&Path>,
        parent: Option<&Path>,
    ) -> Result<Self, CredentialError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("auto-brancher-key-");
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        restrict(dir.path(), 0o700)?;

        let key_path = dir.path().join("id_deploy");
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&key_path)?;
        restrict(&key_path, 0o600)?;
        file.write_all(key.as_bytes())?;
        file.sync_all()?;

        let known_hosts_path = dir.path().join("known_hosts");
        let strict_host_keys = match known_hosts {
            Some(source) => {
                std::fs::copy(source, &known_hosts_path)?;
                true
            }
            None => {
                std::fs::File::create(&known_hosts_path)?;
                false
            }
        };

        Ok(Self {
            dir,
            key_path,
            known_hosts_path,
            strict_host_keys,
        })
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Value for `GIT_SSH_COMMAND`.
    pub fn ssh_command(&self) -> String {
        let checking = if self.strict_host_keys {
            "yes"
        } else {
            "accept-new"
        };
        format!(
            "ssh -i {} -o IdentitiesOnly=yes -o BatchMode=yes -o StrictHostKeyChecking={} -o UserKnownHostsFile={}",
            shell_quote(&self.key_path.to_string_lossy()),
            checking,
            shell_quote(&self.known_hosts_path.to_string_lossy()),
        )
    }

    /// Remove the key directory now, reporting failures.
    pub fn destroy(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

#[cfg(unix)]
fn restrict(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// Single-quote for the shell that git runs `GIT_SSH_COMMAND` through.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
