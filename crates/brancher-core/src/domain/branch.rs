//! Branch specification derived from a publish event.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::version::Version;

/// Where a new branch starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum BaseRef {
    /// The branch the remote's `HEAD` points at, discovered after clone.
    RemoteDefault,
    /// An explicitly configured branch.
    Named(String),
}

impl fmt::Display for BaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseRef::RemoteDefault => write!(f, "<remote default>"),
            BaseRef::Named(name) => write!(f, "{name}"),
        }
    }
}

/// The branch one publish event must produce.
///
/// `name` is a pure function of `(package_name, version)`; redelivery of the
/// same event always yields the same spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSpec {
    pub name: String,
    pub base_ref: BaseRef,
    pub package_name: String,
    pub version: Version,
}

impl BranchSpec {
    /// Fully qualified ref on the remote.
    pub fn remote_ref(&self) -> String {
        format!("refs/heads/{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_ref() {
        let spec = BranchSpec {
            name: "rds-tools-1-2-0".to_string(),
            base_ref: BaseRef::RemoteDefault,
            package_name: "rds-tools".to_string(),
            version: Version::parse("1.2.0").unwrap(),
        };
        assert_eq!(spec.remote_ref(), "refs/heads/rds-tools-1-2-0");
    }

    #[test]
    fn test_base_ref_display() {
        assert_eq!(BaseRef::Named("main".into()).to_string(), "main");
        assert_eq!(BaseRef::RemoteDefault.to_string(), "<remote default>");
    }
}
