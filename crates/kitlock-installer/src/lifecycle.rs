//! Install, update and rollback orchestration.
//!
//! Step order is the correctness contract: files are placed before the lock is
//! written, and verification runs before anything reports success. The only
//! automatic recovery is the single restore attempted when an update fails
//! after a backup was taken.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use kitlock_compat::{check_dependency, update_available, CompatibilityResult};
use kitlock_core::{
    Error, HistoryAction, HistoryStatus, VersionLock, VersionManifest, ALL_COMPONENTS,
    BUNDLE_COMPONENT, DEPENDENCY_COMPONENT,
};
use semver::Version;
use tracing::{debug, error, info, warn, Dispatch};

use crate::backup::{BackupInfo, BackupManager};
use crate::detect::{detect_mode, validate_installation_directory, InstallEnv};
use crate::fs_utils::{count_files, has_files, CopyObserver, NoProgress, PrefixedCopy};
use crate::layout::{
    InstallPaths, PrefixLayout, AGENT_FILE_PREFIX, COMMAND_FILE_PREFIX, MANIFEST_FILE,
};
use crate::lockfile::{load_version_lock, save_version_lock};
use crate::source::{BundleSource, SourceTree};
use crate::types::{
    InstallOptions, InstallReport, InstallStage, InstallationStatus, IntegrationSummary,
    RollbackOptions, RollbackReport, UpdateCheck, UpdateOptions, UpdateReport,
};

const AGENT_COPY: PrefixedCopy<'static> = PrefixedCopy {
    prefix: AGENT_FILE_PREFIX,
    extension: Some("md"),
    recursive: true,
};

const COMMAND_COPY: PrefixedCopy<'static> = PrefixedCopy {
    prefix: COMMAND_FILE_PREFIX,
    extension: Some("md"),
    recursive: false,
};

fn stage_failed(stage: InstallStage) -> String {
    format!("{stage} failed")
}

pub struct Lifecycle<'a> {
    env: InstallEnv,
    source: &'a dyn BundleSource,
    bundle_version: Version,
    dispatch: Dispatch,
    observer: Arc<dyn CopyObserver>,
}

impl<'a> Lifecycle<'a> {
    /// Every operation emits its events through `dispatch`.
    pub fn new(
        env: InstallEnv,
        source: &'a dyn BundleSource,
        bundle_version: Version,
        dispatch: &Dispatch,
    ) -> Self {
        Self {
            env,
            source,
            bundle_version,
            dispatch: dispatch.clone(),
            observer: Arc::new(NoProgress),
        }
    }

    /// Progress sink for backup and restore copies.
    pub fn with_observer(mut self, observer: Arc<dyn CopyObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn env(&self) -> &InstallEnv {
        &self.env
    }

    pub fn bundle_version(&self) -> &Version {
        &self.bundle_version
    }

    pub fn resolve_prefix(&self, prefix: Option<&Path>) -> PathBuf {
        self.env.resolve_prefix(prefix)
    }

    fn scoped<T>(&self, op: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, op)
    }

    fn backups(&self) -> BackupManager {
        BackupManager::new(&self.dispatch).with_observer(Arc::clone(&self.observer))
    }

    pub fn install(&self, options: &InstallOptions) -> Result<InstallReport> {
        self.scoped(|| self.run_install(options))
    }

    fn run_install(&self, options: &InstallOptions) -> Result<InstallReport> {
        if options.global {
            return Err(Error::GlobalInstallUnsupported.into());
        }

        info!(
            component = "installer",
            "Starting spec-kit lockstep installation..."
        );

        debug!(
            component = "installer",
            "Verifying source files ({})...",
            self.source.describe()
        );
        self.source
            .validate()
            .with_context(|| stage_failed(InstallStage::SourceVerification))?;
        info!(component = "installer", success = true, "Source files verified");

        debug!(component = "installer", "Detecting installation mode...");
        let mode = detect_mode(&self.env, options.prefix.as_deref());
        info!(
            component = "installer",
            "Installation mode: {}",
            mode.description()
        );
        if mode.has_lock && !options.force {
            warn!(component = "installer", "Existing installation detected");
            info!(
                component = "installer",
                "Use --force to overwrite existing installation"
            );
            return Err(anyhow::Error::new(Error::AlreadyInstalled {
                prefix: mode.prefix.clone(),
            })
            .context(stage_failed(InstallStage::ModeDetection)));
        }

        debug!(component = "installer", "Validating installation directory...");
        validate_installation_directory(&mode.prefix)
            .with_context(|| stage_failed(InstallStage::DirectoryValidation))?;

        let paths = InstallPaths::new(&mode.prefix, &self.env.home_dir);

        debug!(component = "installer", "Loading version manifest...");
        let manifest = self
            .source
            .manifest()
            .with_context(|| stage_failed(InstallStage::ManifestLoading))?;
        let dependency = manifest
            .pinned_dependency()
            .with_context(|| stage_failed(InstallStage::ManifestLoading))?;
        let dependency_version = dependency.version.clone();
        info!(
            component = "installer",
            "Installing {BUNDLE_COMPONENT} v{} with {DEPENDENCY_COMPONENT} v{dependency_version}",
            self.bundle_version
        );

        let lock_path = paths.prefix.version_lock_path();
        if options.dry_run {
            info!(
                component = "installer",
                "Dry run mode - no files will be modified"
            );
            return Ok(InstallReport {
                mode,
                bundle_version: self.bundle_version.clone(),
                dependency_version,
                dry_run: true,
                files_installed: 0,
                integration: IntegrationSummary::default(),
                lock_path,
                installation_id: None,
            });
        }

        let specify_dir = paths.prefix.specify_dir();
        info!(
            component = "installer",
            "Copying {DEPENDENCY_COMPONENT} files to {}...",
            specify_dir.display()
        );
        self.place_specify(&specify_dir, dependency.integrity.as_deref())
            .with_context(|| stage_failed(InstallStage::FilePlacement))?;
        let files_installed = match count_files(&specify_dir) {
            Ok(count) => {
                info!(
                    component = "installer",
                    success = true,
                    "Copied {count} {DEPENDENCY_COMPONENT} files"
                );
                count
            }
            Err(err) => {
                warn!(
                    component = "installer",
                    "Failed to count {DEPENDENCY_COMPONENT} files: {err:#}"
                );
                0
            }
        };

        info!(component = "installer", "Setting up assistant integration...");
        let integration = self
            .integrate(&paths)
            .with_context(|| stage_failed(InstallStage::Integration))?;
        info!(
            component = "installer",
            success = true,
            "{}",
            integration.summary()
        );

        info!(component = "installer", "Writing version lock...");
        let lock = self.next_lock(mode.has_lock, &paths.prefix, &dependency_version);
        save_version_lock(&lock, &lock_path)
            .with_context(|| stage_failed(InstallStage::LockWrite))?;
        info!(
            component = "installer",
            success = true,
            "Version lock written to {}",
            lock_path.display()
        );

        info!(component = "installer", "Verifying installation...");
        verify_installation(&paths)
            .with_context(|| stage_failed(InstallStage::Verification))?;
        info!(component = "installer", success = true, "Installation verified");

        info!(component = "installer", success = true, "Installation complete!");
        info!(
            component = "installer",
            "  Location: {}",
            paths.prefix.prefix().display()
        );
        info!(
            component = "installer",
            "  {BUNDLE_COMPONENT}: v{}",
            self.bundle_version
        );
        info!(
            component = "installer",
            "  {DEPENDENCY_COMPONENT}: v{dependency_version}"
        );
        info!(
            component = "installer",
            "  Files installed: {files_installed}"
        );
        info!(
            component = "installer",
            "  Agents available: {} (prefix: {AGENT_FILE_PREFIX})",
            integration.agents_copied
        );
        info!(
            component = "installer",
            "  Commands available: {} (prefix: {COMMAND_FILE_PREFIX})",
            integration.commands_copied
        );

        Ok(InstallReport {
            mode,
            bundle_version: self.bundle_version.clone(),
            dependency_version,
            dry_run: false,
            files_installed,
            integration,
            lock_path,
            installation_id: Some(lock.installation_id()),
        })
    }

    /// The pinned digest covers the source tree, so it is checked before the
    /// copy. Files already under `specify_dir` are not part of it.
    fn place_specify(&self, specify_dir: &Path, integrity: Option<&str>) -> Result<()> {
        let tree = self.source.specify()?;

        if let Some(expected) = integrity {
            let actual = tree.integrity_token(&[MANIFEST_FILE])?;
            if !actual.eq_ignore_ascii_case(expected) {
                let path = match &tree {
                    SourceTree::Directory(root) => root.clone(),
                    SourceTree::Memory(_) => specify_dir.to_path_buf(),
                };
                return Err(Error::IntegrityMismatch {
                    path,
                    expected: expected.to_string(),
                    actual,
                }
                .into());
            }
            debug!(component = "installer", "Integrity verified: {actual}");
        }

        match &tree {
            SourceTree::Directory(src) if same_location(src, specify_dir) => {
                debug!(
                    component = "installer",
                    "Source .specify is already in place, skipping copy"
                );
                Ok(())
            }
            _ => tree.copy_into(specify_dir, &NoProgress),
        }
    }

    fn integrate(&self, paths: &InstallPaths) -> Result<IntegrationSummary> {
        let integration = &paths.integration;
        integration.ensure_dirs()?;

        let agents_copied = self
            .source
            .agents()?
            .copy_prefixed(&integration.agents_dir(), &AGENT_COPY)
            .context("failed to copy agents")?;
        let commands_copied = self
            .source
            .commands()?
            .copy_prefixed(&integration.commands_dir(), &COMMAND_COPY)
            .context("failed to copy commands")?;

        Ok(IntegrationSummary {
            agents_copied,
            commands_copied,
        })
    }

    /// A fresh lock, or the existing one carried forward with an upgrade entry
    /// when reinstalling over a readable lock.
    fn next_lock(
        &self,
        had_lock: bool,
        prefix: &PrefixLayout,
        dependency_version: &Version,
    ) -> VersionLock {
        if had_lock {
            match load_version_lock(&prefix.version_lock_path()) {
                Ok(mut existing) => {
                    existing.record_upgrade(&self.bundle_version, dependency_version);
                    return existing;
                }
                Err(err) => warn!(
                    component = "installer",
                    "Existing version lock is unreadable, writing a new one: {err:#}"
                ),
            }
        }
        VersionLock::create(&self.bundle_version, dependency_version, prefix.prefix())
    }

    pub fn update(&self, options: &UpdateOptions) -> Result<UpdateReport> {
        self.scoped(|| self.run_update(options))
    }

    fn run_update(&self, options: &UpdateOptions) -> Result<UpdateReport> {
        info!(component = "update", "Starting update process...");

        let prefix = self.resolve_prefix(options.prefix.as_deref());
        let layout = PrefixLayout::new(&prefix);
        let current = self.load_installed_lock(&layout)?;
        let previous_bundle_version = current.bundle_version()?.clone();
        let previous_dependency_version = current.dependency_version()?.clone();
        info!(component = "update", "Current versions:");
        info!(
            component = "update",
            "  {BUNDLE_COMPONENT}: v{previous_bundle_version}"
        );
        info!(
            component = "update",
            "  {DEPENDENCY_COMPONENT}: v{previous_dependency_version}"
        );

        let manifest = self
            .source
            .manifest()
            .context("failed to load version manifest")?;
        let dependency = manifest.pinned_dependency()?;
        let target_dependency_version = dependency.version.clone();
        info!(component = "update", "Target versions:");
        info!(
            component = "update",
            "  {BUNDLE_COMPONENT}: v{}",
            self.bundle_version
        );
        info!(
            component = "update",
            "  {DEPENDENCY_COMPONENT}: v{target_dependency_version}"
        );

        let mut report = UpdateReport {
            prefix: prefix.clone(),
            previous_bundle_version: previous_bundle_version.clone(),
            previous_dependency_version: previous_dependency_version.clone(),
            bundle_version: self.bundle_version.clone(),
            dependency_version: target_dependency_version.clone(),
            updated: false,
            backup_id: None,
            note: None,
        };

        let up_to_date = previous_bundle_version == self.bundle_version
            && previous_dependency_version == target_dependency_version;
        if up_to_date {
            if !options.force {
                info!(
                    component = "update",
                    "Already at target version, no update needed"
                );
                info!(component = "update", "Use --force to reinstall anyway");
                report.bundle_version = previous_bundle_version;
                report.dependency_version = previous_dependency_version;
                report.note = Some("already at target version".to_string());
                return Ok(report);
            }
            warn!(
                component = "update",
                "Forcing update even though versions match"
            );
            report.note = Some("forced update with matching versions".to_string());
        }

        if !options.skip_verify {
            info!(component = "update", "Checking version compatibility...");
            let target = target_dependency_version.to_string();
            let compatibility = check_dependency(&target, dependency)?;
            if !compatibility.is_compatible() {
                error!(component = "update", "{}", compatibility.issues_text());
                return Err(Error::CompatibilityViolation {
                    version: target,
                    issues: compatibility.issues,
                }
                .into());
            }
            info!(
                component = "update",
                success = true,
                "Version compatibility verified"
            );
        }

        let backup = if options.skip_backup {
            None
        } else {
            info!(component = "update", "Creating backup before update...");
            let backup = self
                .backups()
                .create_backup(&prefix)
                .context("failed to create backup")?;
            report.backup_id = Some(backup.backup_id.clone());
            Some(backup)
        };

        info!(component = "update", "Updating installation...");
        let install = InstallOptions {
            prefix: Some(prefix.clone()),
            force: true,
            ..InstallOptions::default()
        };
        if let Err(err) = self.run_install(&install) {
            return Err(match &backup {
                Some(backup) => self.auto_rollback(backup, err),
                None => err.context("update failed"),
            });
        }

        report.updated = true;
        info!(
            component = "update",
            success = true,
            "Update completed successfully"
        );
        info!(
            component = "update",
            "Updated from v{previous_bundle_version} to v{}",
            self.bundle_version
        );
        if let Some(backup) = &backup {
            info!(
                component = "update",
                "Backup preserved at: {}",
                backup.backup_path.display()
            );
            info!(
                component = "update",
                "To rollback: spec-kit-agents rollback --backup-id={}",
                backup.backup_id
            );
        }

        if let Some(days) = options.retention_days.filter(|days| *days > 0) {
            let max_age = Duration::days(i64::from(days));
            if let Err(err) = self.prune_backups(Some(prefix.as_path()), max_age) {
                warn!(component = "update", "Failed to prune old backups: {err:#}");
            }
        }

        Ok(report)
    }

    /// Restores `backup` once after a failed update and folds both outcomes
    /// into the returned error.
    pub(crate) fn auto_rollback(&self, backup: &BackupInfo, cause: anyhow::Error) -> anyhow::Error {
        self.scoped(|| {
            error!(component = "rollback", "Installation failed: {cause:#}");
            warn!(component = "rollback", "Attempting automatic rollback...");

            match self.backups().restore_backup(backup) {
                Ok(()) => {
                    info!(
                        component = "rollback",
                        success = true,
                        "Automatic rollback completed"
                    );
                    Error::UpdateRolledBack {
                        cause: format!("{cause:#}"),
                    }
                    .into()
                }
                Err(restore_err) => {
                    error!(
                        component = "rollback",
                        "Automatic rollback failed: {restore_err:#}"
                    );
                    Error::RollbackFailed {
                        cause: format!("{cause:#}"),
                        rollback_error: format!("{restore_err:#}"),
                    }
                    .into()
                }
            }
        })
    }

    pub fn rollback(&self, options: &RollbackOptions) -> Result<RollbackReport> {
        self.scoped(|| self.run_rollback(options))
    }

    fn run_rollback(&self, options: &RollbackOptions) -> Result<RollbackReport> {
        info!(component = "rollback", "Starting rollback process...");

        let prefix = self.resolve_prefix(options.prefix.as_deref());
        let layout = PrefixLayout::new(&prefix);
        let lock_path = layout.version_lock_path();

        let previous_version = if lock_path.is_file() {
            match load_version_lock(&lock_path) {
                Ok(lock) => lock.bundle_version().ok().cloned(),
                Err(err) => {
                    warn!(
                        component = "rollback",
                        "Failed to load current version lock: {err:#}"
                    );
                    None
                }
            }
        } else {
            None
        };

        let backups = self.backups();
        let backup = match &options.backup_id {
            Some(id) => backups.find_backup(&prefix, id)?,
            None => backups
                .latest_backup(&prefix)
                .context("failed to find latest backup")?,
        };
        info!(
            component = "rollback",
            "Restoring from backup: {}",
            backup.backup_id
        );
        info!(
            component = "rollback",
            "Created: {}",
            backup.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        backups
            .restore_backup(&backup)
            .context("failed to restore backup")?;

        let mut restored_version = None;
        let mut component_count = 0;
        let mut history_recorded = false;
        if lock_path.is_file() {
            match load_version_lock(&lock_path) {
                Ok(mut lock) => {
                    restored_version = lock.bundle_version().ok().cloned();
                    component_count = lock.components().len();
                    lock.add_history_entry(
                        HistoryAction::Rollback,
                        ALL_COMPONENTS,
                        restored_version.as_ref(),
                        HistoryStatus::Success,
                        None,
                    );
                    match save_version_lock(&lock, &lock_path) {
                        Ok(()) => history_recorded = true,
                        Err(err) => warn!(
                            component = "rollback",
                            "Failed to update version lock: {err:#}"
                        ),
                    }
                }
                Err(err) => warn!(
                    component = "rollback",
                    "Failed to load restored version lock: {err:#}"
                ),
            }
        }

        info!(
            component = "rollback",
            success = true,
            "Rollback completed successfully"
        );
        if let Some(version) = &restored_version {
            info!(component = "rollback", "Restored version: {version}");
        }

        Ok(RollbackReport {
            prefix,
            backup_id: backup.backup_id,
            previous_version,
            restored_version,
            component_count,
            history_recorded,
        })
    }

    pub fn status(&self, prefix: Option<&Path>) -> Result<InstallationStatus> {
        let prefix = self.resolve_prefix(prefix);
        let lock_path = PrefixLayout::new(&prefix).version_lock_path();
        if !lock_path.is_file() {
            return Ok(InstallationStatus {
                prefix,
                installed: false,
                installation_id: None,
                installed_at: None,
                last_verified: None,
                bundle_version: None,
                dependency_version: None,
                history_count: 0,
                last_entry: None,
            });
        }

        let lock = load_version_lock(&lock_path).context("failed to load version lock")?;
        Ok(InstallationStatus {
            prefix,
            installed: true,
            installation_id: Some(lock.installation_id()),
            installed_at: Some(lock.installed_at()),
            last_verified: lock.last_verified(),
            bundle_version: lock.bundle_version().ok().cloned(),
            dependency_version: lock.dependency_version().ok().cloned(),
            history_count: lock.history().len(),
            last_entry: lock.last_history_entry().cloned(),
        })
    }

    /// Checks the installed dependency against the installed manifest's window
    /// and records the outcome as a `verify` entry.
    pub fn check(&self, prefix: Option<&Path>) -> Result<CompatibilityResult> {
        self.scoped(|| self.run_check(prefix))
    }

    fn run_check(&self, prefix: Option<&Path>) -> Result<CompatibilityResult> {
        let prefix = self.resolve_prefix(prefix);
        let layout = PrefixLayout::new(&prefix);
        let mut lock = self.load_installed_lock(&layout)?;

        let manifest_path = layout.manifest_path();
        let manifest = VersionManifest::load(&manifest_path).with_context(|| {
            format!("failed to load version manifest: {}", manifest_path.display())
        })?;
        let dependency = manifest.pinned_dependency()?;
        let installed = lock.dependency_version()?.clone();
        let installed_str = installed.to_string();

        info!(
            component = "check",
            "Checking {DEPENDENCY_COMPONENT} v{installed} against the manifest window..."
        );
        let result = check_dependency(&installed_str, dependency)?;

        if result.is_compatible() {
            lock.update_verification_time();
            lock.add_history_entry(
                HistoryAction::Verify,
                DEPENDENCY_COMPONENT,
                Some(&installed),
                HistoryStatus::Success,
                None,
            );
        } else {
            let issues = result.issues.join("; ");
            lock.add_history_entry(
                HistoryAction::Verify,
                DEPENDENCY_COMPONENT,
                Some(&installed),
                HistoryStatus::Failure,
                Some(&issues),
            );
        }
        save_version_lock(&lock, &layout.version_lock_path())?;

        if !result.is_compatible() {
            error!(component = "check", "{}", result.issues_text());
            return Err(Error::CompatibilityViolation {
                version: installed_str,
                issues: result.issues,
            }
            .into());
        }
        if result.has_issues() {
            warn!(component = "check", "{}", result.issues_text());
        }
        info!(
            component = "check",
            success = true,
            "{DEPENDENCY_COMPONENT} v{installed} is compatible"
        );
        Ok(result)
    }

    /// Compares the installed dependency with the version the source pins.
    pub fn check_for_updates(&self, prefix: Option<&Path>) -> Result<UpdateCheck> {
        let prefix = self.resolve_prefix(prefix);
        let lock = self.load_installed_lock(&PrefixLayout::new(&prefix))?;
        let current = lock.dependency_version()?.clone();
        let manifest = self
            .source
            .manifest()
            .context("failed to load version manifest")?;
        let available = manifest.pinned_dependency()?.version.clone();
        let availability = update_available(&current.to_string(), &available.to_string())?;
        Ok(UpdateCheck {
            current,
            available,
            availability,
        })
    }

    /// The backup a rollback would restore, if there is one.
    pub fn can_rollback(&self, prefix: Option<&Path>) -> Result<Option<BackupInfo>> {
        let prefix = self.resolve_prefix(prefix);
        match self.backups().latest_backup(&prefix) {
            Ok(backup) => Ok(Some(backup)),
            Err(err) if matches!(err.downcast_ref::<Error>(), Some(Error::NoBackups { .. })) => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Backups of the prefix, newest first.
    pub fn list_backups(&self, prefix: Option<&Path>) -> Result<Vec<BackupInfo>> {
        let prefix = self.resolve_prefix(prefix);
        let mut backups = self.backups().list_backups(&prefix)?;
        backups.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.backup_id.cmp(&a.backup_id))
        });
        Ok(backups)
    }

    pub fn prune_backups(&self, prefix: Option<&Path>, max_age: Duration) -> Result<usize> {
        let prefix = self.resolve_prefix(prefix);
        self.backups().prune_older_than(&prefix, max_age)
    }

    fn load_installed_lock(&self, layout: &PrefixLayout) -> Result<VersionLock> {
        match load_version_lock(&layout.version_lock_path()) {
            Ok(lock) => Ok(lock),
            Err(err) if matches!(err.downcast_ref::<Error>(), Some(Error::LockNotFound { .. })) => {
                Err(Error::NotInstalled {
                    prefix: layout.prefix().to_path_buf(),
                }
                .into())
            }
            Err(err) => Err(err.context("failed to load current version lock")),
        }
    }
}

/// Post-install checks: the placed tree, a re-loadable lock naming both
/// components, and at least one file in each integration directory.
fn verify_installation(paths: &InstallPaths) -> Result<()> {
    let failed = |message: String| -> anyhow::Error { Error::VerificationFailed(message).into() };

    let specify_dir = paths.prefix.specify_dir();
    if !specify_dir.is_dir() {
        return Err(failed(format!(
            ".specify/ directory not found at {}",
            specify_dir.display()
        )));
    }
    let manifest_path = paths.prefix.manifest_path();
    if !manifest_path.is_file() {
        return Err(failed(format!(
            "version manifest not found at {}",
            manifest_path.display()
        )));
    }

    let lock = load_version_lock(&paths.prefix.version_lock_path())
        .map_err(|err| failed(format!("version lock is invalid: {err:#}")))?;
    for component in [BUNDLE_COMPONENT, DEPENDENCY_COMPONENT] {
        if lock.component(component).is_err() {
            return Err(failed(format!(
                "version lock missing {component} component"
            )));
        }
    }

    for dir in [
        paths.integration.agents_dir(),
        paths.integration.commands_dir(),
    ] {
        if !has_files(&dir) {
            return Err(failed(format!("no files installed in {}", dir.display())));
        }
    }
    Ok(())
}

fn same_location(left: &Path, right: &Path) -> bool {
    match (fs::canonicalize(left), fs::canonicalize(right)) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}
