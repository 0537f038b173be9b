// src/version.rs

//! Version-name ordering within a product family
//!
//! Simplestreams version names are usually date serials (`20240101`,
//! `20240101.1`), which sort correctly as strings. Catalogs that use dotted
//! release numbers can opt into semantic ordering.
//!
//! Semantic ordering is a total order:
//! - names that parse as versions compare by semver precedence;
//! - a parseable name sorts above an unparseable one;
//! - everything else, including semver ties such as `1.0` vs `1.0.0`,
//!   falls back to byte-wise comparison.

use crate::config::VersionOrder;
use semver::Version;
use std::cmp::Ordering;

/// Parse a version name, accepting one to three numeric components
/// (`22`, `22.04`, `1.2.3`) as well as full semver strings
pub fn parse_lenient(name: &str) -> Option<Version> {
    if let Ok(version) = Version::parse(name) {
        return Some(version);
    }

    let parts: Vec<&str> = name.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        *slot = part.parse().ok()?;
    }
    Some(Version::new(numbers[0], numbers[1], numbers[2]))
}

/// Compare two version names under the given order
pub fn compare(order: VersionOrder, a: &str, b: &str) -> Ordering {
    match order {
        VersionOrder::Lexical => a.cmp(b),
        VersionOrder::Semantic => match (parse_lenient(a), parse_lenient(b)) {
            (Some(va), Some(vb)) => va.cmp(&vb).then_with(|| a.cmp(b)),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => a.cmp(b),
        },
    }
}

/// Sort version names newest first
pub fn sort_newest_first(order: VersionOrder, names: &mut [String]) {
    names.sort_by(|a, b| compare(order, b, a));
}
