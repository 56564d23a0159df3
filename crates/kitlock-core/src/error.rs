//! Error taxonomy shared by every lifecycle component.
//!
//! Each variant carries the path, version or rule that failed so a caller can
//! diagnose the problem without re-running in a debug mode.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// A semantic version string could not be parsed.
    #[error("invalid version '{input}': {reason}")]
    InvalidVersion { input: String, reason: String },

    /// The version lock failed schema validation.
    #[error("corrupt version lock: field '{field}': {reason}")]
    CorruptLock { field: String, reason: String },

    /// The version manifest failed schema validation.
    #[error("corrupt version manifest: field '{field}': {reason}")]
    CorruptManifest { field: String, reason: String },

    #[error("version lock not found: {}", path.display())]
    LockNotFound { path: PathBuf },

    #[error("component {name} not found in version lock")]
    ComponentNotFound { name: String },

    #[error("dependency {name} not found in manifest")]
    DependencyNotFound { name: String },

    #[error("installation already exists at {} (use --force to overwrite)", prefix.display())]
    AlreadyInstalled { prefix: PathBuf },

    #[error("no installation found at {} (run 'install' first)", prefix.display())]
    NotInstalled { prefix: PathBuf },

    /// Required local files are absent.
    #[error("required source not found: {} ({detail})", path.display())]
    SourceMissing { path: PathBuf, detail: String },

    #[error("installation directory is not usable: {} ({reason})", path.display())]
    DirectoryNotWritable { path: PathBuf, reason: String },

    #[error("no backups found for {}", install_path.display())]
    NoBackups { install_path: PathBuf },

    #[error("backup does not exist: {}", backup_path.display())]
    BackupMissing { backup_path: PathBuf },

    #[error("backup not found: {backup_id}")]
    BackupNotFound { backup_id: String },

    /// Two backups of the same prefix were requested within one second.
    #[error("backup {backup_id} already exists at {}", backup_path.display())]
    BackupCollision {
        backup_id: String,
        backup_path: PathBuf,
    },

    #[error("version {version} is incompatible: {}", issues.join("; "))]
    CompatibilityViolation { version: String, issues: Vec<String> },

    #[error("integrity mismatch for {}: expected {expected}, got {actual}", path.display())]
    IntegrityMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Post-install checks failed; files may already be written.
    #[error("installation verification failed: {0}")]
    VerificationFailed(String),

    #[error("update failed but was rolled back successfully: {cause}")]
    UpdateRolledBack { cause: String },

    /// The installation may be inconsistent and needs manual intervention.
    #[error("update failed and rollback also failed: {cause} (rollback error: {rollback_error})")]
    RollbackFailed {
        cause: String,
        rollback_error: String,
    },

    #[error("global installation is not implemented")]
    GlobalInstallUnsupported,

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn corrupt_lock(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptLock {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn corrupt_manifest(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptManifest {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the single outcome where the installation may be left inconsistent.
    pub fn requires_manual_intervention(&self) -> bool {
        matches!(self, Self::RollbackFailed { .. })
    }
}
