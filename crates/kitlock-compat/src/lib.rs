//! Semantic-version compatibility checks between an installed dependency and
//! the window its manifest declares.
//!
//! Every function here is pure: inputs are strings as they appear on disk and
//! any unparsable value surfaces as [`kitlock_core::Error::InvalidVersion`].

mod check;
mod compare;

pub use check::{check_compatibility, check_dependency, CompatibilityResult};
pub use compare::{compare, in_range, is_breaking, parse_version, update_available};

/// How the installed bundle relates to the version a source ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAvailability {
    UpToDate,
    Available,
    AheadOfManifest,
}

impl UpdateAvailability {
    pub fn is_available(self) -> bool {
        matches!(self, Self::Available)
    }
}
