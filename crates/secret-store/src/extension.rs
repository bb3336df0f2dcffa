//! Parameters-and-secrets extension client
//!
//! Serverless functions can run a local HTTP extension that proxies the
//! platform secret manager. Secrets are requested with
//! `GET /secretsmanager/get?secretId=<id>` and authenticated with the
//! function's session token.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::{SecretError, SecretResult};
use crate::{SecretStore, SecretValue};

/// Default extension endpoint inside the function sandbox.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:2773";

/// Header carrying the session token.
pub const TOKEN_HEADER: &str = "X-Aws-Parameters-Secrets-Token";

/// Extension client configuration
#[derive(Clone)]
pub struct ExtensionConfig {
    /// Base URL of the extension
    pub endpoint: String,
    /// Session token sent with every request
    pub session_token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for ExtensionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionConfig")
            .field("endpoint", &self.endpoint)
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        let port = std::env::var("PARAMETERS_SECRETS_EXTENSION_HTTP_PORT").ok();
        let endpoint = match port {
            Some(port) => format!("http://localhost:{port}"),
            None => DEFAULT_ENDPOINT.to_string(),
        };
        ExtensionConfig {
            endpoint,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl ExtensionConfig {
    /// Create a config from the function environment
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create config for a specific endpoint
    pub fn new(endpoint: &str) -> Self {
        ExtensionConfig {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            session_token: None,
            timeout: Duration::from_secs(5),
        }
    }

    /// Set the session token
    pub fn with_token(mut self, token: &str) -> Self {
        self.session_token = Some(token.to_string());
        self
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Deserialize)]
struct GetSecretResponse {
    #[serde(rename = "SecretString")]
    secret_string: Option<String>,
}

/// Secret store backed by the local extension
pub struct ExtensionSecretStore {
    config: ExtensionConfig,
    http_client: reqwest::Client,
}

impl ExtensionSecretStore {
    /// Create a new extension client
    pub fn new(config: ExtensionConfig) -> SecretResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("auto-brancher-secret-store/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|e| SecretError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(ExtensionSecretStore {
            config,
            http_client,
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> SecretResult<Self> {
        Self::new(ExtensionConfig::from_env())
    }

    pub fn config(&self) -> &ExtensionConfig {
        &self.config
    }
}

#[async_trait]
impl SecretStore for ExtensionSecretStore {
    #[instrument(skip(self), fields(endpoint = %self.config.endpoint))]
    async fn get_secret(&self, secret_id: &str) -> SecretResult<SecretValue> {
        let url = format!("{}/secretsmanager/get", self.config.endpoint);
        let mut request = self.http_client.get(&url).query(&[("secretId", secret_id)]);
        if let Some(token) = &self.config.session_token {
            request = request.header(TOKEN_HEADER, token);
        }

        let response = request.send().await?;
        let status = response.status();
        debug!(status = status.as_u16(), "secrets extension responded");

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SecretError::NotFound(secret_id.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SecretError::Http(format!(
                "secrets extension returned {status}: {}",
                body.chars().take(256).collect::<String>()
            )));
        }

        let body: GetSecretResponse = response
            .json()
            .await
            .map_err(|e| SecretError::Malformed(format!("unreadable extension response: {e}")))?;

        match body.secret_string {
            Some(value) if !value.is_empty() => Ok(SecretValue::new(value)),
            Some(_) => Err(SecretError::Malformed(format!(
                "secret {secret_id} is empty"
            ))),
            None => Err(SecretError::Malformed(format!(
                "secret {secret_id} has no SecretString (binary secrets are not supported)"
            ))),
        }
    }

    fn backend(&self) -> &'static str {
        "extension"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_config_new_trims_slash() {
        let config = ExtensionConfig::new("http://127.0.0.1:2773/");
        assert_eq!(config.endpoint, "http://127.0.0.1:2773");
        assert!(config.session_token.is_none());
    }

    #[test]
    fn test_extension_config_with_token() {
        let config = ExtensionConfig::new(DEFAULT_ENDPOINT).with_token("session");
        assert_eq!(config.session_token.as_deref(), Some("session"));
    }

    #[test]
    fn test_extension_config_debug_hides_token() {
        let config = ExtensionConfig::new(DEFAULT_ENDPOINT).with_token("very-secret-token");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("very-secret-token"));
    }
}
