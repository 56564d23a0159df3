use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use kitlock_core::Error;

use crate::fs_utils::remove_file_if_exists;
use crate::layout::{resolve_path, PrefixLayout, COEXIST_PREFIX, SPECIFY_DIR};

/// The two directories every decision is anchored to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallEnv {
    pub working_dir: PathBuf,
    pub home_dir: PathBuf,
}

impl InstallEnv {
    pub fn new(working_dir: impl Into<PathBuf>, home_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            home_dir: home_dir.into(),
        }
    }

    pub fn resolve(&self, raw: &Path) -> PathBuf {
        resolve_path(raw, &self.working_dir, &self.home_dir)
    }

    /// Prefix for an explicit override, or the default for this working directory:
    /// the working directory itself when it already holds a managed lock, the
    /// coexist sub-prefix when it holds an unmanaged `.specify/`, else itself.
    pub fn resolve_prefix(&self, prefix: Option<&Path>) -> PathBuf {
        if let Some(prefix) = prefix {
            return self.resolve(prefix);
        }
        let managed_here = PrefixLayout::new(&self.working_dir)
            .version_lock_path()
            .is_file();
        if !managed_here && self.has_marker() {
            self.resolve(Path::new(COEXIST_PREFIX))
        } else {
            self.resolve(Path::new("."))
        }
    }

    pub fn has_marker(&self) -> bool {
        self.working_dir.join(SPECIFY_DIR).is_dir()
    }

    pub fn has_integration(&self) -> bool {
        self.home_dir.join(".claude").is_dir()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    Fresh,
    Upgrade,
    Coexist,
}

impl ModeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Upgrade => "upgrade",
            Self::Coexist => "coexist",
        }
    }
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationMode {
    pub kind: ModeKind,
    pub has_marker: bool,
    pub has_integration: bool,
    pub has_lock: bool,
    pub prefix: PathBuf,
}

impl InstallationMode {
    pub fn description(&self) -> String {
        match self.kind {
            ModeKind::Upgrade => format!(
                "Upgrade existing installation at {}",
                self.prefix.display()
            ),
            ModeKind::Coexist => format!(
                "Coexist with existing .specify/ using prefix {}",
                self.prefix.display()
            ),
            ModeKind::Fresh => format!("Fresh installation at {}", self.prefix.display()),
        }
    }
}

/// Classifies the target by inspecting the filesystem. An existing lock wins
/// over a pre-existing `.specify/`, which wins over a fresh install.
///
/// Only the lock file's presence counts: a lock that no longer parses still
/// classifies as an upgrade, so a plain install refuses to run over it and
/// `--force` replaces it with a fresh lock.
pub fn detect_mode(env: &InstallEnv, prefix_override: Option<&Path>) -> InstallationMode {
    let has_marker = env.has_marker();
    let has_integration = env.has_integration();
    let prefix = env.resolve_prefix(prefix_override);
    let has_lock = PrefixLayout::new(&prefix).version_lock_path().is_file();

    let kind = if has_lock {
        ModeKind::Upgrade
    } else if has_marker {
        ModeKind::Coexist
    } else {
        ModeKind::Fresh
    };

    InstallationMode {
        kind,
        has_marker,
        has_integration,
        has_lock,
        prefix,
    }
}

/// Creates `prefix` when absent; otherwise it must be a directory that accepts writes.
pub fn validate_installation_directory(prefix: &Path) -> Result<()> {
    let not_writable = |reason: String| Error::DirectoryNotWritable {
        path: prefix.to_path_buf(),
        reason,
    };

    match fs::metadata(prefix) {
        Ok(metadata) if !metadata.is_dir() => {
            return Err(not_writable("path exists but is not a directory".to_string()).into());
        }
        Ok(_) => {}
        Err(_) => {
            fs::create_dir_all(prefix)
                .map_err(|err| not_writable(format!("cannot create directory: {err}")))?;
            return Ok(());
        }
    }

    let test_file = prefix.join(".write-test");
    fs::write(&test_file, b"test").map_err(|err| not_writable(format!("write test failed: {err}")))?;
    remove_file_if_exists(&test_file)
        .map_err(|err| not_writable(format!("cannot remove write test file: {err}")))?;
    Ok(())
}
