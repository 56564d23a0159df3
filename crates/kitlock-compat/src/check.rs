use std::cmp::Ordering;
use std::fmt::Write as _;

use kitlock_core::{Dependency, Result};
use semver::Version;

use crate::compare::{compare, in_range, is_breaking};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityResult {
    pub installed_version: String,
    pub required_version: String,
    pub compatible: bool,
    pub version_mismatch: bool,
    pub issues: Vec<String>,
}

impl CompatibilityResult {
    pub fn is_compatible(&self) -> bool {
        self.compatible
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }

    pub fn issues_text(&self) -> String {
        if !self.has_issues() {
            return String::new();
        }
        let mut text = String::from("Compatibility issues:\n");
        for (index, issue) in self.issues.iter().enumerate() {
            let _ = writeln!(text, "  {}. {issue}", index + 1);
        }
        text
    }
}

/// Checks `installed` against the declared window and the pinned `required`
/// version. A version mismatch alone is reported but does not make the result
/// incompatible.
pub fn check_compatibility<S: AsRef<str>>(
    installed: &str,
    required: &str,
    min: Option<&str>,
    max: Option<&str>,
    breaking: &[S],
) -> Result<CompatibilityResult> {
    let min = min.filter(|bound| !bound.trim().is_empty());
    let max = max.filter(|bound| !bound.trim().is_empty());
    let mut result = CompatibilityResult {
        installed_version: installed.to_string(),
        required_version: required.to_string(),
        compatible: true,
        version_mismatch: false,
        issues: Vec::new(),
    };

    if !in_range(installed, min, max)? {
        result.compatible = false;
        let issue = match (min, max) {
            (Some(min), Some(max)) => Some(format!(
                "installed version {installed} is outside allowed range {min} - {max}"
            )),
            (Some(min), None) => Some(format!(
                "installed version {installed} is below minimum version {min}"
            )),
            (None, Some(max)) => Some(format!(
                "installed version {installed} is above maximum version {max}"
            )),
            (None, None) => None,
        };
        result.issues.extend(issue);
    }

    if is_breaking(installed, breaking)? {
        result.compatible = false;
        result
            .issues
            .push(format!("installed version {installed} is a known breaking version"));
    }

    match compare(installed, required)? {
        Ordering::Equal => {}
        Ordering::Less => {
            result.version_mismatch = true;
            result.issues.push(format!(
                "installed version {installed} is older than required version {required}"
            ));
        }
        Ordering::Greater => {
            result.version_mismatch = true;
            result.issues.push(format!(
                "installed version {installed} is newer than required version {required}"
            ));
        }
    }

    Ok(result)
}

/// [`check_compatibility`] against a manifest entry: its pinned version is the
/// required one and its compatibility block is the window.
pub fn check_dependency(installed: &str, dependency: &Dependency) -> Result<CompatibilityResult> {
    let compatibility = &dependency.compatibility;
    let min = compatibility.min_version.as_ref().map(Version::to_string);
    let max = compatibility.max_version.as_ref().map(Version::to_string);
    let breaking = compatibility
        .breaking_versions
        .iter()
        .map(Version::to_string)
        .collect::<Vec<_>>();
    check_compatibility(
        installed,
        &dependency.version.to_string(),
        min.as_deref(),
        max.as_deref(),
        &breaking,
    )
}
