//! Validation errors for inbound events.

/// Errors produced while validating a publish notification.
///
/// Every variant maps to [`FailureKind::InvalidEvent`](super::FailureKind::InvalidEvent):
/// the input will never become valid by retrying it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("event missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid package name {name:?}: {reason}")]
    InvalidPackageName { name: String, reason: String },

    #[error("invalid semantic version {input:?}: {reason}")]
    InvalidVersion { input: String, reason: String },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::MissingField {
            field: "packageName",
        };
        assert_eq!(err.to_string(), "event missing required field: packageName");

        let err = ValidationError::InvalidVersion {
            input: "1.2".to_string(),
            reason: "expected MAJOR.MINOR.PATCH".to_string(),
        };
        assert!(err.to_string().contains("\"1.2\""));
    }
}
