//! Branch Resolver: publish event → deterministic branch spec.
//!
//! Naming is a pure function of the validated `(packageName, version)` pair.
//! No clock, no randomness: a redelivered event lands on the same branch,
//! which is what lets the handler skip work it has already done.

use sha2::{Digest, Sha256};

use crate::domain::{BaseRef, BranchSpec, PublishEvent, ValidationError, Version};

/// Longest package slug kept verbatim; longer slugs are cut and hashed.
pub const MAX_PACKAGE_SLUG: usize = 100;

/// Hex digits of the disambiguating digest.
const DIGEST_LEN: usize = 8;

/// Precedes the digest. Plain names always end in a numeric segment, so a
/// lettered suffix can never reproduce one.
const DIGEST_MARKER: char = 'h';

/// Derives [`BranchSpec`]s from publish events.
#[derive(Debug, Clone)]
pub struct BranchResolver {
    base_ref: BaseRef,
}

impl Default for BranchResolver {
    fn default() -> Self {
        Self::new(BaseRef::RemoteDefault)
    }
}

impl BranchResolver {
    pub fn new(base_ref: BaseRef) -> Self {
        Self { base_ref }
    }

    pub fn base_ref(&self) -> &BaseRef {
        &self.base_ref
    }

    /// Validate `event` and compute its branch.
    pub fn resolve(&self, event: &PublishEvent) -> Result<BranchSpec, ValidationError> {
        let package_name = event.package_name.trim();
        if package_name.is_empty() {
            return Err(ValidationError::MissingField {
                field: "packageName",
            });
        }
        if event.version.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "version" });
        }
        if !package_name.chars().any(|c| c.is_ascii_alphanumeric()) {
            return Err(ValidationError::InvalidPackageName {
                name: package_name.to_string(),
                reason: "must contain at least one ASCII letter or digit".to_string(),
            });
        }

        let version = Version::parse(&event.version)?;
        let name = branch_name(package_name, &version);

        Ok(BranchSpec {
            name,
            base_ref: self.base_ref.clone(),
            package_name: package_name.to_string(),
            version,
        })
    }
}

/// Branch name for a validated pair.
///
/// `rds-tools` + `1.2.0` → `rds-tools-1-2-0`. When slugging loses
/// information an `h` + 8-hex-digit SHA-256 suffix over the exact pair keeps
/// distinct pairs apart: `@aws-cdk/core` + `1.2.0` → `aws-cdk-core-1-2-0-h<digest>`.
pub fn branch_name(package_name: &str, version: &Version) -> String {
    let full_slug = slugify(package_name);
    let package_slug = truncate_slug(&full_slug, MAX_PACKAGE_SLUG);
    let canonical = version.to_string();
    let version_slug = slugify(&canonical);

    let lossy = package_slug != package_name || version.has_qualifiers();
    if lossy {
        let mut hasher = Sha256::new();
        hasher.update(package_name.as_bytes());
        hasher.update(b"\n");
        hasher.update(canonical.as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!(
            "{package_slug}-{version_slug}-{DIGEST_MARKER}{}",
            &digest[..DIGEST_LEN]
        )
    } else {
        format!("{package_slug}-{version_slug}")
    }
}

/// Lowercase, map everything outside `[a-z0-9]` to `-`, collapse and trim.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;
    for c in input.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    slug
}

fn truncate_slug(slug: &str, max: usize) -> String {
    if slug.len() <= max {
        return slug.to_string();
    }
    // slug is ASCII, byte slicing is safe
    slug[..max].trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, version: &str) -> PublishEvent {
        PublishEvent::new(name, version)
    }

    #[test]
    fn test_resolve_plain_event() {
        let spec = BranchResolver::default()
            .resolve(&event("rds-tools", "1.2.0"))
            .unwrap();
        assert_eq!(spec.name, "rds-tools-1-2-0");
        assert_eq!(spec.base_ref, BaseRef::RemoteDefault);
        assert_eq!(spec.package_name, "rds-tools");
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let resolver = BranchResolver::default();
        let a = resolver.resolve(&event("rds-tools", "1.2.0")).unwrap();
        let b = resolver
            .resolve(&event("rds-tools", "1.2.0").with_timestamp(chrono::Utc::now()))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_leading_v_maps_to_same_branch() {
        let resolver = BranchResolver::default();
        let a = resolver.resolve(&event("rds-tools", "v1.2.0")).unwrap();
        let b = resolver.resolve(&event("rds-tools", "1.2.0")).unwrap();
        assert_eq!(a.name, b.name);
    }

    #[test]
    fn test_scoped_package_gets_digest_suffix() {
        let spec = BranchResolver::default()
            .resolve(&event("@aws-cdk/core", "1.2.0"))
            .unwrap();
        let suffix = spec.name.strip_prefix("aws-cdk-core-1-2-0-h").unwrap();
        assert_eq!(suffix.len(), DIGEST_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hashed_name_never_equals_plain_name() {
        // "A87" hashes to a digest of only decimal digits, which an
        // unmarked suffix would confuse with a patch number.
        let resolver = BranchResolver::default();
        let hashed = resolver.resolve(&event("A87", "1.0.0")).unwrap();
        let plain = resolver.resolve(&event("a87-1", "0.0.75116517")).unwrap();
        assert_eq!(plain.name, "a87-1-0-0-75116517");
        assert_ne!(hashed.name, plain.name);
        assert!(hashed.name.starts_with("a87-1-0-0-h"));
    }

    #[test]
    fn test_colliding_slugs_stay_distinct() {
        let resolver = BranchResolver::default();
        let dotted = resolver.resolve(&event("a.b", "1.0.0")).unwrap();
        let dashed = resolver.resolve(&event("a-b", "1.0.0")).unwrap();
        assert_ne!(dotted.name, dashed.name);
        assert_eq!(dashed.name, "a-b-1-0-0");

        let pre_dot = resolver.resolve(&event("pkg", "1.0.0-rc.1")).unwrap();
        let pre_dash = resolver.resolve(&event("pkg", "1.0.0-rc-1")).unwrap();
        assert_ne!(pre_dot.name, pre_dash.name);
    }

    #[test]
    fn test_long_package_name_is_truncated() {
        let long = "x".repeat(300);
        let spec = BranchResolver::default()
            .resolve(&event(&long, "1.0.0"))
            .unwrap();
        assert!(spec.name.len() <= MAX_PACKAGE_SLUG + "-1-0-0-h".len() + DIGEST_LEN);
        assert!(spec.name.starts_with(&"x".repeat(MAX_PACKAGE_SLUG)));
    }

    #[test]
    fn test_named_base_ref_is_carried() {
        let resolver = BranchResolver::new(BaseRef::Named("develop".to_string()));
        let spec = resolver.resolve(&event("rds-tools", "1.2.0")).unwrap();
        assert_eq!(spec.base_ref, BaseRef::Named("develop".to_string()));
    }

    #[test]
    fn test_missing_package_name() {
        let err = BranchResolver::default()
            .resolve(&event("  ", "1.2.0"))
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingField {
                field: "packageName"
            }
        );
    }

    #[test]
    fn test_missing_version() {
        let err = BranchResolver::default()
            .resolve(&event("rds-tools", ""))
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingField { field: "version" });
    }

    #[test]
    fn test_unparsable_version() {
        let err = BranchResolver::default()
            .resolve(&event("rds-tools", "latest"))
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidVersion { .. }));
    }

    #[test]
    fn test_punctuation_only_package() {
        let err = BranchResolver::default()
            .resolve(&event("@/", "1.0.0"))
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPackageName { .. }));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("@Aws-CDK/Core"), "aws-cdk-core");
        assert_eq!(slugify("--a__b--"), "a-b");
        assert_eq!(slugify("1.2.0"), "1-2-0");
    }
}
