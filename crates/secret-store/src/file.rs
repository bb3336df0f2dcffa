//! Secrets mounted as files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{SecretError, SecretResult};
use crate::{SecretStore, SecretValue};

/// Reads `<dir>/<id>` where `id` is flattened to a single path component.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a secret id resolves to. Separators and other unsafe characters
    /// become `_` so an id can never escape `dir`.
    pub fn path_for(&self, secret_id: &str) -> PathBuf {
        let file_name: String = secret_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let file_name = file_name.trim_start_matches('.');
        self.dir.join(file_name)
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get_secret(&self, secret_id: &str) -> SecretResult<SecretValue> {
        let path = self.path_for(secret_id);
        debug!(path = %path.display(), "reading mounted secret");

        match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Err(SecretError::Malformed(format!(
                "secret file {} is empty",
                path.display()
            ))),
            Ok(content) => Ok(SecretValue::new(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SecretError::NotFound(secret_id.to_string()))
            }
            Err(e) => Err(SecretError::Io(e)),
        }
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}
