//! In-memory secret store (testing only)

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{SecretError, SecretResult};
use crate::{SecretStore, SecretValue};

/// Secret store backed by a `HashMap<id, value>`.
///
/// Counts every read and can be switched into an unreachable state to
/// simulate an outage.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<String, String>>,
    reads: AtomicUsize,
    unreachable: AtomicBool,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(self, secret_id: &str, value: &str) -> Self {
        self.put(secret_id, value);
        self
    }

    /// Insert or rotate a secret.
    pub fn put(&self, secret_id: &str, value: &str) {
        let mut secrets = self.secrets.lock().unwrap();
        secrets.insert(secret_id.to_string(), value.to_string());
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Number of `get_secret` calls so far, successful or not.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_secret(&self, secret_id: &str) -> SecretResult<SecretValue> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SecretError::Unreachable(
                "memory store is offline".to_string(),
            ));
        }
        let secrets = self.secrets.lock().unwrap();
        secrets
            .get(secret_id)
            .map(|v| SecretValue::new(v.clone()))
            .ok_or_else(|| SecretError::NotFound(secret_id.to_string()))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rotation_is_visible_immediately() {
        let store = MemorySecretStore::new().with_secret("key", "v1");
        assert_eq!(store.get_secret("key").await.unwrap().expose(), "v1");
        store.put("key", "v2");
        assert_eq!(store.get_secret("key").await.unwrap().expose(), "v2");
        assert_eq!(store.reads(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_still_counts_reads() {
        let store = MemorySecretStore::new().with_secret("key", "v1");
        store.set_unreachable(true);
        let err = store.get_secret("key").await.unwrap_err();
        assert!(matches!(err, SecretError::Unreachable(_)));
        assert_eq!(store.reads(), 1);
    }
}
