//! Canonical forms for identifiers that arrive from callers: tenant slugs,
//! phone numbers, email addresses, and storefront domains.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

const SLUG_MIN_LEN: usize = 3;
const SLUG_MAX_LEN: usize = 48;
const PHONE_MIN_DIGITS: usize = 8;
const PHONE_MAX_DIGITS: usize = 15;

/// Validated tenant slug; the tenant actor key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantSlug(String);

impl TenantSlug {
    /// Parses a slug: lowercase letters, digits and hyphens, no leading or trailing hyphen.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let slug = raw.trim();
        if slug.len() < SLUG_MIN_LEN || slug.len() > SLUG_MAX_LEN {
            return Err(DomainError::validation(
                "slug",
                format!("must be between {SLUG_MIN_LEN} and {SLUG_MAX_LEN} characters"),
            ));
        }
        if !slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(DomainError::validation(
                "slug",
                "may only contain lowercase letters, digits and hyphens",
            ));
        }
        if slug.starts_with('-') || slug.ends_with('-') {
            return Err(DomainError::validation(
                "slug",
                "must not start or end with a hyphen",
            ));
        }
        Ok(Self(slug.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalizes a phone number to `+` followed by 8 to 15 digits.
///
/// Spaces, dashes, dots and parentheses are dropped; a `+` is only accepted
/// as the first character.
pub fn normalize_phone(raw: &str) -> Result<String, DomainError> {
    let trimmed = raw.trim();
    let body = trimmed.strip_prefix('+').unwrap_or(trimmed);

    let mut digits = String::with_capacity(body.len());
    for c in body.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => {
                return Err(DomainError::validation(
                    "phone",
                    format!("unexpected character '{c}'"),
                ));
            }
        }
    }

    if digits.len() < PHONE_MIN_DIGITS || digits.len() > PHONE_MAX_DIGITS {
        return Err(DomainError::validation(
            "phone",
            format!("must contain between {PHONE_MIN_DIGITS} and {PHONE_MAX_DIGITS} digits"),
        ));
    }

    Ok(format!("+{digits}"))
}

/// Digits of a normalized phone number, used for file names.
pub fn phone_digits(phone: &str) -> &str {
    phone.strip_prefix('+').unwrap_or(phone)
}

/// Lowercases and validates an email address.
pub fn normalize_email(raw: &str) -> Result<String, DomainError> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(email)
        }
        _ => Err(DomainError::validation("email", "must be a valid email address")),
    }
}

static DOMAIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)+$")
        .expect("domain pattern is valid")
});

/// Normalizes a storefront domain: lowercase, no scheme, path, port or trailing dot.
pub fn normalize_domain(raw: &str) -> Result<String, DomainError> {
    let trimmed = raw.trim().to_lowercase();
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(&trimmed);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default();
    let host = host.trim_end_matches('.');

    if host.len() > 253 || !DOMAIN_PATTERN.is_match(host) {
        return Err(DomainError::validation(
            "domain",
            "must be a host name such as shop.example.com",
        ));
    }

    Ok(host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_rules() {
        assert!(TenantSlug::parse("acme").is_ok());
        assert!(TenantSlug::parse("acme-co-2").is_ok());
        assert!(TenantSlug::parse("ab").is_err());
        assert!(TenantSlug::parse("Acme").is_err());
        assert!(TenantSlug::parse("-acme").is_err());
        assert!(TenantSlug::parse("acme_co").is_err());
        assert!(TenantSlug::parse(&"a".repeat(49)).is_err());
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(normalize_phone("+1 (555) 010-2030").unwrap(), "+15550102030");
        assert_eq!(normalize_phone("4915123456789").unwrap(), "+4915123456789");
        assert!(normalize_phone("12345").is_err());
        assert!(normalize_phone("+1555abc0102").is_err());
        assert!(normalize_phone("1+5550102030").is_err());
        assert_eq!(phone_digits("+15550102030"), "15550102030");
    }

    #[test]
    fn email_normalization() {
        assert_eq!(normalize_email(" Ada@Example.COM ").unwrap(), "ada@example.com");
        assert!(normalize_email("ada.example.com").is_err());
        assert!(normalize_email("@example.com").is_err());
        assert!(normalize_email("a@b@c").is_err());
    }

    #[test]
    fn domain_normalization() {
        assert_eq!(normalize_domain("Shop1.Example").unwrap(), "shop1.example");
        assert_eq!(
            normalize_domain("https://shop1.example/admin?x=1").unwrap(),
            "shop1.example"
        );
        assert_eq!(normalize_domain("shop1.example:443").unwrap(), "shop1.example");
        assert!(normalize_domain("localhost").is_err());
        assert!(normalize_domain("bad_domain.example").is_err());
        assert!(normalize_domain("").is_err());
    }
}
