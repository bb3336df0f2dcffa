//! Error types for secret-store

use thiserror::Error;

/// Errors that can occur while reading a secret
#[derive(Error, Debug)]
pub enum SecretError {
    /// The store could not be reached at all
    #[error("secret store unreachable: {0}")]
    Unreachable(String),

    /// The store answered but has no such secret
    #[error("secret not found: {0}")]
    NotFound(String),

    /// The store answered with something that is not a usable secret
    #[error("malformed secret: {0}")]
    Malformed(String),

    /// The store answered with an unexpected HTTP status
    #[error("HTTP error: {0}")]
    Http(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for SecretError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            SecretError::Unreachable(err.to_string())
        } else if err.is_decode() {
            SecretError::Malformed(err.to_string())
        } else {
            SecretError::Http(err.to_string())
        }
    }
}

/// Result type for secret-store operations
pub type SecretResult<T> = std::result::Result<T, SecretError>;
