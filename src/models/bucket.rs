//! Buckets are not stored; a bucket is an identifier prefix.
//! This module holds the naming rules and the mapping between an
//! `(owner, bucket, key)` triple and a store identifier.
//!
//! Every identifier written through the HTTP surfaces has the shape
//! `owner \u{1f} bucket / key`, so users never see each other's objects.

use thiserror::Error;

pub const BUCKET_NAME_MIN_LEN: usize = 3;
pub const BUCKET_NAME_MAX_LEN: usize = 63;

/// Separator between bucket and key inside an identifier. Bucket names can
/// never contain it.
pub const SEPARATOR: char = '/';

/// Separator between the owning user and the rest of an identifier. It is a
/// control character, so neither user ids nor keys can contain it.
pub const OWNER_SEPARATOR: char = '\u{1f}';

/// Bucket used by native requests that send no `Bucket` header.
pub const DEFAULT_BUCKET: &str = "default";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid bucket name `{name}`: {reason}")]
pub struct InvalidBucketName {
    pub name: String,
    pub reason: &'static str,
}

/// Check a bucket name against S3 DNS-style naming rules.
pub fn validate_bucket_name(name: &str) -> Result<(), InvalidBucketName> {
    let invalid = |reason| {
        Err(InvalidBucketName {
            name: name.to_string(),
            reason,
        })
    };

    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&name.len()) {
        return invalid("must be between 3 and 63 characters");
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return invalid("allowed characters are lowercase letters, digits, dots, and hyphens");
    }
    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return invalid("must start and end with a lowercase letter or digit");
    }
    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return invalid("cannot contain consecutive dots or dot-hyphen combinations");
    }
    if is_ipv4_like(name) {
        return invalid("cannot be formatted as an IP address");
    }
    Ok(())
}

/// Identifier prefix shared by every object `owner` stores.
pub fn owner_prefix(owner: &str) -> String {
    format!("{}{}", owner, OWNER_SEPARATOR)
}

/// Identifier prefix shared by every object in `owner`'s `bucket`.
pub fn bucket_prefix(owner: &str, bucket: &str) -> String {
    format!("{}{}{}", owner_prefix(owner), bucket, SEPARATOR)
}

/// Store identifier for `key` in `owner`'s `bucket`.
pub fn object_identifier(owner: &str, bucket: &str, key: &str) -> String {
    format!("{}{}", bucket_prefix(owner, bucket), key)
}

/// The key part of an identifier, without owner and bucket. Identifiers
/// without an owner are returned whole.
pub fn object_key(identifier: &str) -> &str {
    match identifier.split_once(OWNER_SEPARATOR) {
        Some((_, scoped)) => scoped
            .split_once(SEPARATOR)
            .map_or(scoped, |(_, key)| key),
        None => identifier,
    }
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_dns_style_names() {
        for name in ["my-bucket", "logs.2024", "abc", "a1b2c3"] {
            assert!(validate_bucket_name(name).is_ok(), "{}", name);
        }
    }

    #[test]
    fn rejects_bad_names() {
        for name in [
            "ab",
            "UpperCase",
            "under_score",
            "-leading",
            "trailing.",
            "double..dot",
            "dot-.hyphen",
            "192.168.1.1",
            "has/slash",
        ] {
            assert!(validate_bucket_name(name).is_err(), "{}", name);
        }
        assert!(validate_bucket_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn identifiers_join_owner_bucket_and_key() {
        let id = object_identifier("alice", "photos", "2024/cat.jpg");
        assert_eq!(id, "alice\u{1f}photos/2024/cat.jpg");
        assert!(id.starts_with(&bucket_prefix("alice", "photos")));
        assert!(!id.starts_with(&owner_prefix("ali")));
        assert_eq!(object_key(&id), "2024/cat.jpg");
        assert_eq!(object_key("flat"), "flat");
    }
}
