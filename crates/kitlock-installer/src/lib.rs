mod backup;
mod detect;
mod fs_utils;
mod layout;
mod lifecycle;
mod lockfile;
mod log;
mod source;
mod types;

pub use backup::{backup_id_for, backup_path_for, parse_backup_id, BackupInfo, BackupManager};
pub use detect::{
    detect_mode, validate_installation_directory, InstallEnv, InstallationMode, ModeKind,
};
pub use fs_utils::{
    copy_prefixed, copy_tree, count_files, dir_size, format_size, has_files, remove_dir_if_exists,
    remove_file_if_exists, CopyObserver, NoProgress, PrefixedCopy,
};
pub use layout::{
    default_user_home, resolve_path, InstallPaths, IntegrationLayout, PrefixLayout,
    AGENT_FILE_PREFIX, COEXIST_PREFIX, COMMAND_FILE_PREFIX, MANIFEST_FILE, SPECIFY_DIR,
    VERSION_LOCK_FILE,
};
pub use lifecycle::Lifecycle;
pub use lockfile::{load_version_lock, save_version_lock};
pub use log::{
    file_writer, line_layer, EventFields, LineFormat, LogLevel, DEFAULT_COMPONENT,
};
pub use source::{
    ArchiveSource, BundleSource, EmbeddedSource, RepositorySource, SourceKind, SourceTree,
};
pub use types::{
    InstallOptions, InstallReport, InstallStage, InstallationStatus, IntegrationSummary,
    RollbackOptions, RollbackReport, UpdateCheck, UpdateOptions, UpdateReport,
};

/// The typed failure at the root of an error chain, if there is one.
pub fn root_error(err: &anyhow::Error) -> Option<&kitlock_core::Error> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<kitlock_core::Error>())
}

#[cfg(test)]
mod tests;
