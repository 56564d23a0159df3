use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use kitlock_core::HistoryEntry;
use semver::Version;
use uuid::Uuid;

use crate::detect::InstallationMode;

/// Orchestrator progress; the stage being attempted is attached to any error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    SourceVerification,
    ModeDetection,
    DirectoryValidation,
    ManifestLoading,
    FilePlacement,
    Integration,
    LockWrite,
    Verification,
}

impl InstallStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SourceVerification => "source verification",
            Self::ModeDetection => "mode detection",
            Self::DirectoryValidation => "installation directory validation",
            Self::ManifestLoading => "manifest loading",
            Self::FilePlacement => "file placement",
            Self::Integration => "assistant integration",
            Self::LockWrite => "version lock write",
            Self::Verification => "installation verification",
        }
    }
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOptions {
    pub prefix: Option<PathBuf>,
    pub global: bool,
    pub force: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub prefix: Option<PathBuf>,
    pub skip_backup: bool,
    pub force: bool,
    pub skip_verify: bool,
    /// Prune backups older than this many days after a successful update.
    pub retention_days: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackOptions {
    pub prefix: Option<PathBuf>,
    /// Restore this backup instead of the most recent one.
    pub backup_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrationSummary {
    pub agents_copied: usize,
    pub commands_copied: usize,
}

impl IntegrationSummary {
    pub fn summary(&self) -> String {
        format!(
            "Integrated {} agents and {} commands",
            self.agents_copied, self.commands_copied
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub mode: InstallationMode,
    pub bundle_version: Version,
    pub dependency_version: Version,
    pub dry_run: bool,
    pub files_installed: u64,
    pub integration: IntegrationSummary,
    pub lock_path: PathBuf,
    pub installation_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub prefix: PathBuf,
    pub previous_bundle_version: Version,
    pub previous_dependency_version: Version,
    pub bundle_version: Version,
    pub dependency_version: Version,
    /// False when the installation was already current and nothing changed.
    pub updated: bool,
    pub backup_id: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    pub prefix: PathBuf,
    pub backup_id: String,
    pub previous_version: Option<Version>,
    /// None when the restored tree carries no readable lock.
    pub restored_version: Option<Version>,
    pub component_count: usize,
    /// False when the `rollback` history entry could not be written back.
    pub history_recorded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationStatus {
    pub prefix: PathBuf,
    pub installed: bool,
    pub installation_id: Option<Uuid>,
    pub installed_at: Option<DateTime<Utc>>,
    pub last_verified: Option<DateTime<Utc>>,
    pub bundle_version: Option<Version>,
    pub dependency_version: Option<Version>,
    pub history_count: usize,
    pub last_entry: Option<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCheck {
    pub current: Version,
    pub available: Version,
    pub availability: kitlock_compat::UpdateAvailability,
}
