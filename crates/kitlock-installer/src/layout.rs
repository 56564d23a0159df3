use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};

pub const SPECIFY_DIR: &str = ".specify";
pub const MANIFEST_FILE: &str = "version-manifest.json";
pub const VERSION_LOCK_FILE: &str = ".version-lock.json";
/// Sub-prefix used when the working directory already carries an unmanaged `.specify/`.
pub const COEXIST_PREFIX: &str = ".spec-kit-agents";
pub const AGENT_FILE_PREFIX: &str = "cat-";
pub const COMMAND_FILE_PREFIX: &str = "speckit.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixLayout {
    prefix: PathBuf,
}

impl PrefixLayout {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn specify_dir(&self) -> PathBuf {
        self.prefix.join(SPECIFY_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.specify_dir().join(MANIFEST_FILE)
    }

    pub fn version_lock_path(&self) -> PathBuf {
        self.prefix.join(VERSION_LOCK_FILE)
    }
}

/// The per-user assistant directory the bundle integrates with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationLayout {
    root: PathBuf,
}

impl IntegrationLayout {
    pub fn new(home: &Path) -> Self {
        Self {
            root: home.join(".claude"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.root.join("agents")
    }

    pub fn commands_dir(&self) -> PathBuf {
        self.root.join("commands")
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.root.join("skills")
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.agents_dir(), self.commands_dir(), self.skills_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPaths {
    pub prefix: PrefixLayout,
    pub integration: IntegrationLayout,
}

impl InstallPaths {
    pub fn new(prefix: impl Into<PathBuf>, home: &Path) -> Self {
        Self {
            prefix: PrefixLayout::new(prefix),
            integration: IntegrationLayout::new(home),
        }
    }
}

pub fn default_user_home() -> Result<PathBuf> {
    if cfg!(windows) {
        let profile = std::env::var("USERPROFILE")
            .context("USERPROFILE is not set; cannot resolve Windows home directory")?;
        return Ok(PathBuf::from(profile));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve home directory")?;
    Ok(PathBuf::from(home))
}

/// Expands a leading `~` against `home` and anchors relative paths at `base`.
pub fn resolve_path(raw: &Path, base: &Path, home: &Path) -> PathBuf {
    let expanded = match raw.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => raw.to_path_buf(),
    };
    let anchored = if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    };
    normalize_lexically(&anchored)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
