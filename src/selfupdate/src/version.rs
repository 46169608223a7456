//! Semantic version validation and ordering.

use std::cmp::Ordering;

/// Parse a version string, tolerating a leading `v`.
pub fn parse(version: &str) -> Option<semver::Version> {
    let version = version.strip_prefix('v').unwrap_or(version);
    semver::Version::parse(version).ok()
}

/// Check if a string is a valid semantic version.
pub fn is_valid(version: &str) -> bool {
    parse(version).is_some()
}

/// Compare two semver version strings.
///
/// An invalid version orders before every valid one, and two invalid versions
/// compare equal.
pub fn compare(a: &str, b: &str) -> Ordering {
    match (parse(a), parse(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Check if `candidate` is strictly newer than `installed`.
pub fn is_newer(candidate: &str, installed: &str) -> bool {
    compare(candidate, installed) == Ordering::Greater
}
