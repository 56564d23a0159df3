//! Whole-tree snapshots of an installation, stored as siblings named
//! `<install_path>.backup-YYYYMMDD-HHMMSS`.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use kitlock_core::{format_timestamp, now_utc, Error, BUNDLE_COMPONENT};
use tracing::{debug, info, warn, Dispatch};

use crate::fs_utils::{
    copy_tree, count_files, dir_size, format_size, remove_dir_if_exists, CopyObserver, NoProgress,
};

const BACKUP_ID_PREFIX: &str = "backup-";
const BACKUP_ID_FORMAT: &str = "%Y%m%d-%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    pub backup_id: String,
    pub backup_path: PathBuf,
    pub original_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub component_name: String,
    /// Only known for backups created in this process.
    pub size_bytes: Option<u64>,
}

pub fn backup_id_for(instant: DateTime<Utc>) -> String {
    format!("{BACKUP_ID_PREFIX}{}", instant.format(BACKUP_ID_FORMAT))
}

pub fn parse_backup_id(backup_id: &str) -> Option<DateTime<Utc>> {
    let stamp = backup_id.strip_prefix(BACKUP_ID_PREFIX)?;
    NaiveDateTime::parse_from_str(stamp, BACKUP_ID_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn backup_path_for(install_path: &Path, backup_id: &str) -> PathBuf {
    let mut name = OsString::from(install_path.as_os_str());
    name.push(".");
    name.push(backup_id);
    PathBuf::from(name)
}

pub struct BackupManager {
    dispatch: Dispatch,
    observer: Arc<dyn CopyObserver>,
}

impl BackupManager {
    pub fn new(dispatch: &Dispatch) -> Self {
        Self {
            dispatch: dispatch.clone(),
            observer: Arc::new(NoProgress),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CopyObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn create_backup(&self, install_path: &Path) -> Result<BackupInfo> {
        self.create_backup_at(install_path, now_utc())
    }

    pub(crate) fn create_backup_at(
        &self,
        install_path: &Path,
        now: DateTime<Utc>,
    ) -> Result<BackupInfo> {
        self.scoped(|| self.snapshot(install_path, now))
    }

    fn snapshot(&self, install_path: &Path, now: DateTime<Utc>) -> Result<BackupInfo> {
        if !install_path.exists() {
            return Err(Error::SourceMissing {
                path: install_path.to_path_buf(),
                detail: "installation path does not exist".to_string(),
            }
            .into());
        }

        let backup_id = backup_id_for(now);
        let backup_path = backup_path_for(install_path, &backup_id);
        if backup_path.exists() {
            return Err(Error::BackupCollision {
                backup_id,
                backup_path,
            }
            .into());
        }

        info!(
            component = "backup",
            "Creating backup of {}...",
            install_path.display()
        );
        debug!(
            component = "backup",
            "Backup destination: {}",
            backup_path.display()
        );

        self.copy_with_progress("Backing up", install_path, &backup_path)
            .with_context(|| format!("failed to create backup {backup_id}"))?;

        let size_bytes = match dir_size(&backup_path) {
            Ok(size) => {
                info!(component = "backup", "Backup size: {}", format_size(size));
                Some(size)
            }
            Err(err) => {
                warn!(component = "backup", "Failed to calculate backup size: {err:#}");
                None
            }
        };

        info!(
            component = "backup",
            success = true,
            "Backup created: {}",
            backup_path.display()
        );
        Ok(BackupInfo {
            backup_id,
            backup_path,
            original_path: install_path.to_path_buf(),
            created_at: now,
            component_name: BUNDLE_COMPONENT.to_string(),
            size_bytes,
        })
    }

    /// Replaces the original tree with the backup's contents. Not atomic: a
    /// failure part-way leaves the original path incomplete.
    pub fn restore_backup(&self, backup: &BackupInfo) -> Result<()> {
        self.scoped(|| self.restore(backup))
    }

    fn restore(&self, backup: &BackupInfo) -> Result<()> {
        info!(
            component = "backup",
            "Restoring from backup: {}",
            backup.backup_id
        );

        if !backup.backup_path.exists() {
            return Err(Error::BackupMissing {
                backup_path: backup.backup_path.clone(),
            }
            .into());
        }

        if backup.original_path.exists() {
            debug!(component = "backup", "Removing current installation...");
            remove_dir_if_exists(&backup.original_path).with_context(|| {
                format!(
                    "failed to remove current installation: {}",
                    backup.original_path.display()
                )
            })?;
        }

        debug!(component = "backup", "Copying backup to original location...");
        self.copy_with_progress("Restoring", &backup.backup_path, &backup.original_path)
            .with_context(|| format!("failed to restore backup {}", backup.backup_id))?;

        info!(
            component = "backup",
            success = true,
            "Backup restored successfully"
        );
        Ok(())
    }

    /// Removes the backup tree; succeeds when it is already gone.
    pub fn cleanup_backup(&self, backup: &BackupInfo) -> Result<()> {
        self.scoped(|| self.remove(backup))
    }

    fn remove(&self, backup: &BackupInfo) -> Result<()> {
        if !backup.backup_path.exists() {
            return Ok(());
        }
        debug!(
            component = "backup",
            "Cleaning up backup: {}",
            backup.backup_id
        );
        remove_dir_if_exists(&backup.backup_path).with_context(|| {
            format!("failed to cleanup backup: {}", backup.backup_path.display())
        })?;
        info!(component = "backup", "Backup cleaned up: {}", backup.backup_id);
        Ok(())
    }

    /// Every backup directory taken of `install_path`, in no particular order.
    pub fn list_backups(&self, install_path: &Path) -> Result<Vec<BackupInfo>> {
        let parent = install_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let Some(base_name) = install_path.file_name() else {
            return Ok(Vec::new());
        };
        let marker = format!("{}.{BACKUP_ID_PREFIX}", base_name.to_string_lossy());

        if !parent.is_dir() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in fs::read_dir(parent)
            .with_context(|| format!("failed to read directory: {}", parent.display()))?
        {
            let entry =
                entry.with_context(|| format!("failed to iterate {}", parent.display()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.len() <= marker.len() || !name.starts_with(&marker) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_dir() {
                continue;
            }

            let backup_id = name[marker.len() - BACKUP_ID_PREFIX.len()..].to_string();
            let created_at = parse_backup_id(&backup_id)
                .or_else(|| metadata.modified().ok().map(DateTime::<Utc>::from))
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
            backups.push(BackupInfo {
                backup_id,
                backup_path: entry.path(),
                original_path: install_path.to_path_buf(),
                created_at,
                component_name: BUNDLE_COMPONENT.to_string(),
                size_bytes: None,
            });
        }
        Ok(backups)
    }

    pub fn latest_backup(&self, install_path: &Path) -> Result<BackupInfo> {
        self.list_backups(install_path)?
            .into_iter()
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.backup_id.cmp(&b.backup_id))
            })
            .ok_or_else(|| {
                Error::NoBackups {
                    install_path: install_path.to_path_buf(),
                }
                .into()
            })
    }

    pub fn find_backup(&self, install_path: &Path, backup_id: &str) -> Result<BackupInfo> {
        self.list_backups(install_path)?
            .into_iter()
            .find(|backup| backup.backup_id == backup_id)
            .ok_or_else(|| {
                Error::BackupNotFound {
                    backup_id: backup_id.to_string(),
                }
                .into()
            })
    }

    /// Deletes backups older than `max_age`, logging and skipping any that fail.
    pub fn prune_older_than(&self, install_path: &Path, max_age: Duration) -> Result<usize> {
        self.prune_before(install_path, now_utc() - max_age)
    }

    pub(crate) fn prune_before(&self, install_path: &Path, cutoff: DateTime<Utc>) -> Result<usize> {
        self.scoped(|| self.prune(install_path, cutoff))
    }

    fn prune(&self, install_path: &Path, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for backup in self.list_backups(install_path)? {
            if backup.created_at >= cutoff {
                continue;
            }
            debug!(
                component = "backup",
                "Removing old backup: {} (created {})",
                backup.backup_id,
                format_timestamp(&backup.created_at)
            );
            match self.remove(&backup) {
                Ok(()) => removed += 1,
                Err(err) => warn!(
                    component = "backup",
                    "Failed to cleanup backup {}: {err:#}",
                    backup.backup_id
                ),
            }
        }
        if removed > 0 {
            info!(component = "backup", "Cleaned up {removed} old backup(s)");
        }
        Ok(removed)
    }

    fn scoped<T>(&self, op: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, op)
    }

    fn copy_with_progress(&self, label: &str, src: &Path, dst: &Path) -> Result<()> {
        let total = count_files(src).unwrap_or(0);
        self.observer.begin(label, total);
        let result = copy_tree(src, dst, self.observer.as_ref());
        self.observer.finish();
        result
    }
}
