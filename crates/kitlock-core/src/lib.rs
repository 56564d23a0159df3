mod error;
mod format;
mod lock;
mod manifest;

pub use error::{Error, Result};
pub use format::{
    format_timestamp, is_commit_hash, is_integrity_token, is_plain_version, is_schema_version,
    now_utc, parse_date, parse_plain_version, parse_timestamp,
};
pub use lock::{Component, HistoryAction, HistoryEntry, HistoryStatus, InstallSource, VersionLock};
pub use manifest::{Compatibility, Dependency, DependencySource, UpdatePolicy, VersionManifest};

/// The bundle this tool installs.
pub const BUNDLE_COMPONENT: &str = "spec-kit-agents";
/// The dependency shipped and pinned alongside the bundle.
pub const DEPENDENCY_COMPONENT: &str = "spec-kit";
/// History target for entries that cover every component at once.
pub const ALL_COMPONENTS: &str = "all";
pub const LOCK_SCHEMA_VERSION: &str = "1.0";
