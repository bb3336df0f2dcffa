//! Semantic version parsing.
//!
//! Accepts `MAJOR.MINOR.PATCH[-PRE][+BUILD]` with an optional leading `v`.
//! The canonical `Display` form (no `v`) feeds branch naming, so `v1.2.0`
//! and `1.2.0` resolve to the same branch.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::ValidationError;

/// Parsed semantic version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Vec<String>,
    pub build: Vec<String>,
}

impl Version {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidVersion {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty version"));
        }
        let text = trimmed.strip_prefix('v').unwrap_or(trimmed);

        let (rest, build) = match text.split_once('+') {
            Some((rest, build)) => (rest, Some(build)),
            None => (text, None),
        };
        let (core, pre) = match rest.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (rest, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(invalid("expected MAJOR.MINOR.PATCH"));
        }
        let mut numbers = [0u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = parse_numeric(part).ok_or_else(|| {
                invalid(&format!("{part:?} is not a non-negative integer without leading zeros"))
            })?;
        }

        let pre = match pre {
            Some(pre) => parse_identifiers(pre, true)
                .ok_or_else(|| invalid("malformed pre-release identifiers"))?,
            None => Vec::new(),
        };
        let build = match build {
            Some(build) => parse_identifiers(build, false)
                .ok_or_else(|| invalid("malformed build metadata"))?,
            None => Vec::new(),
        };

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            pre,
            build,
        })
    }

    /// Whether the version carries pre-release or build identifiers.
    pub fn has_qualifiers(&self) -> bool {
        !self.pre.is_empty() || !self.build.is_empty()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.pre.is_empty() {
            write!(f, "-{}", self.pre.join("."))?;
        }
        if !self.build.is_empty() {
            write!(f, "+{}", self.build.join("."))?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Version {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_numeric(part: &str) -> Option<u64> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if part.len() > 1 && part.starts_with('0') {
        return None;
    }
    part.parse().ok()
}

/// Dot-separated `[0-9A-Za-z-]+` identifiers. Numeric pre-release
/// identifiers must not carry leading zeros.
fn parse_identifiers(text: &str, numeric_rule: bool) -> Option<Vec<String>> {
    let mut out = Vec::new();
    for ident in text.split('.') {
        if ident.is_empty()
            || !ident
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        {
            return None;
        }
        if numeric_rule
            && ident.bytes().all(|b| b.is_ascii_digit())
            && ident.len() > 1
            && ident.starts_with('0')
        {
            return None;
        }
        out.push(ident.to_string());
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_version() {
        let v = Version::parse("1.2.0").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 2, 0));
        assert!(!v.has_qualifiers());
        assert_eq!(v.to_string(), "1.2.0");
    }

    #[test]
    fn test_leading_v_is_canonicalised() {
        let v = Version::parse("v10.0.3").unwrap();
        assert_eq!(v.to_string(), "10.0.3");
        assert_eq!(v, Version::parse("10.0.3").unwrap());
    }

    #[test]
    fn test_pre_release_and_build() {
        let v = Version::parse("1.0.0-rc.1+build.5").unwrap();
        assert_eq!(v.pre, vec!["rc", "1"]);
        assert_eq!(v.build, vec!["build", "5"]);
        assert!(v.has_qualifiers());
        assert_eq!(v.to_string(), "1.0.0-rc.1+build.5");
    }

    #[test]
    fn test_hyphen_inside_pre_release_identifier() {
        let v = Version::parse("1.0.0-alpha-beta").unwrap();
        assert_eq!(v.pre, vec!["alpha-beta"]);
    }

    #[test]
    fn test_rejects_malformed_versions() {
        for bad in [
            "", "1", "1.2", "1.2.3.4", "01.2.3", "1.02.3", "a.b.c", "1.2.3-", "1.2.3+",
            "1.2.3-rc..1", "1.2.3-01", "1.2.3-rc_1", "-1.2.3", "1.2.3 beta",
        ] {
            assert!(Version::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_build_metadata_allows_leading_zero() {
        assert!(Version::parse("1.2.3+001").is_ok());
    }

    #[test]
    fn test_from_str() {
        let v: Version = "0.0.1".parse().unwrap();
        assert_eq!(v.patch, 1);
    }
}
