//! Secrets injected as environment variables.

use async_trait::async_trait;

use crate::error::{SecretError, SecretResult};
use crate::{SecretStore, SecretValue};

/// Reads an environment variable derived from the secret id.
///
/// `auto-brancher/deploy-key` with prefix `BRANCHER_` maps to
/// `BRANCHER_AUTO_BRANCHER_DEPLOY_KEY`.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretStore {
    prefix: String,
}

impl EnvSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    pub fn var_name(&self, secret_id: &str) -> String {
        let name: String = secret_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}", self.prefix, name)
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret(&self, secret_id: &str) -> SecretResult<SecretValue> {
        let var = self.var_name(secret_id);
        match std::env::var(&var) {
            Ok(value) if value.trim().is_empty() => {
                Err(SecretError::Malformed(format!("{var} is empty")))
            }
            Ok(value) => Ok(SecretValue::new(value)),
            Err(std::env::VarError::NotPresent) => Err(SecretError::NotFound(var)),
            Err(std::env::VarError::NotUnicode(_)) => {
                Err(SecretError::Malformed(format!("{var} is not valid UTF-8")))
            }
        }
    }

    fn backend(&self) -> &'static str {
        "env"
    }
}
