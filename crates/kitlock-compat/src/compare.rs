use std::cmp::Ordering;

use kitlock_core::{Error, Result};
use semver::Version;

use crate::UpdateAvailability;

pub fn parse_version(input: &str) -> Result<Version> {
    Version::parse(input.trim()).map_err(|err| Error::InvalidVersion {
        input: input.to_string(),
        reason: err.to_string(),
    })
}

/// Orders two versions by semver precedence; build metadata does not participate.
pub fn compare(a: &str, b: &str) -> Result<Ordering> {
    let left = parse_version(a)?;
    let right = parse_version(b)?;
    Ok(left.cmp_precedence(&right))
}

/// Inclusive bounds check. An absent or empty bound leaves that side open, and
/// with both sides open the version itself is not parsed.
pub fn in_range(version: &str, min: Option<&str>, max: Option<&str>) -> Result<bool> {
    let min = min.filter(|bound| !bound.trim().is_empty());
    let max = max.filter(|bound| !bound.trim().is_empty());
    if min.is_none() && max.is_none() {
        return Ok(true);
    }

    let version = parse_version(version)?;
    if let Some(min) = min {
        if version.cmp_precedence(&parse_version(min)?) == Ordering::Less {
            return Ok(false);
        }
    }
    if let Some(max) = max {
        if version.cmp_precedence(&parse_version(max)?) == Ordering::Greater {
            return Ok(false);
        }
    }
    Ok(true)
}

pub fn is_breaking<S: AsRef<str>>(version: &str, breaking: &[S]) -> Result<bool> {
    let version = parse_version(version)?;
    for candidate in breaking {
        let candidate = parse_version(candidate.as_ref())?;
        if version.cmp_precedence(&candidate) == Ordering::Equal {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn update_available(current: &str, target: &str) -> Result<UpdateAvailability> {
    Ok(match compare(current, target)? {
        Ordering::Less => UpdateAvailability::Available,
        Ordering::Equal => UpdateAvailability::UpToDate,
        Ordering::Greater => UpdateAvailability::AheadOfManifest,
    })
}
