//! Secret store backends for auto-brancher.
//!
//! The brancher fetches its SSH deploy key from a secret store on every
//! invocation. This crate defines the [`SecretStore`] boundary and the
//! backends a deployment can choose from:
//!
//! - [`ExtensionSecretStore`]: the local parameters-and-secrets HTTP extension
//!   available to serverless functions.
//! - [`FileSecretStore`]: secrets mounted as files in a directory.
//! - [`EnvSecretStore`]: secrets injected as environment variables.
//!
//! No backend caches values across calls; the secret may rotate between
//! invocations.

pub mod env;
pub mod error;
pub mod extension;
pub mod fakes;
pub mod file;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

pub use env::EnvSecretStore;
pub use error::{SecretError, SecretResult};
pub use extension::{ExtensionConfig, ExtensionSecretStore};
pub use file::FileSecretStore;

/// Secret material returned by a [`SecretStore`].
///
/// Held in a [`SecretString`]: never printed by `Debug`, zeroized on drop.
pub struct SecretValue(SecretString);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    /// Borrow the secret content.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.expose().len()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretValue(<redacted, {} bytes>)", self.len())
    }
}

/// Read access to a secret store.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the current value of `secret_id`.
    async fn get_secret(&self, secret_id: &str) -> SecretResult<SecretValue>;

    /// Short backend name used in logs.
    fn backend(&self) -> &'static str;
}
