//! Where the bundle's files come from.
//!
//! The orchestrator only sees [`BundleSource`]; each backend hands back
//! [`SourceTree`] views for the agents, the `.specify` tree and the command
//! templates.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use kitlock_core::{Error, VersionManifest};
use kitlock_security::{
    files_digest_hex, integrity_token, parse_integrity_token, tree_digest_hex,
    tree_integrity_token,
};

use crate::fs_utils::{copy_prefixed, copy_tree, count_files, CopyObserver, PrefixedCopy};
use crate::layout::{MANIFEST_FILE, SPECIFY_DIR};

const AGENTS_DIR: &str = "agents";
const COMMANDS_DIR: &str = ".specify/templates/commands";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Repository,
    Archive,
    Embedded,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::Archive => "archive",
            Self::Embedded => "embedded",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A read-only file tree supplied by a source backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceTree {
    Directory(PathBuf),
    /// Files keyed by `/`-separated relative path.
    Memory(BTreeMap<String, Vec<u8>>),
}

impl SourceTree {
    pub fn read_file(&self, relative: &str) -> Result<Vec<u8>> {
        match self {
            Self::Directory(root) => {
                let path = root.join(relative);
                if !path.is_file() {
                    return Err(Error::SourceMissing {
                        path,
                        detail: "file not found in source".to_string(),
                    }
                    .into());
                }
                fs::read(&path).with_context(|| format!("failed to read {}", path.display()))
            }
            Self::Memory(files) => files.get(relative).cloned().ok_or_else(|| {
                Error::SourceMissing {
                    path: PathBuf::from(relative),
                    detail: "file not embedded".to_string(),
                }
                .into()
            }),
        }
    }

    pub fn file_count(&self) -> Result<u64> {
        match self {
            Self::Directory(root) => count_files(root),
            Self::Memory(files) => Ok(files.len() as u64),
        }
    }

    /// `sha256-<hex>` token over the tree's files, skipping `exclude`.
    pub fn integrity_token(&self, exclude: &[&str]) -> Result<String> {
        match self {
            Self::Directory(root) => tree_integrity_token(root, exclude),
            Self::Memory(files) => Ok(integrity_token(&files_digest_hex(
                files
                    .iter()
                    .map(|(relative, bytes)| (relative.as_str(), bytes.as_slice())),
                exclude,
            ))),
        }
    }

    /// Copies every file under `dst`; files already in `dst` that the tree
    /// does not carry are left alone.
    pub fn copy_into(&self, dst: &Path, observer: &dyn CopyObserver) -> Result<()> {
        match self {
            Self::Directory(root) => copy_tree(root, dst, observer),
            Self::Memory(files) => {
                fs::create_dir_all(dst)
                    .with_context(|| format!("failed to create directory: {}", dst.display()))?;
                for (relative, bytes) in files {
                    let target = dst.join(relative);
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent).with_context(|| {
                            format!("failed to create directory: {}", parent.display())
                        })?;
                    }
                    fs::write(&target, bytes)
                        .with_context(|| format!("failed to write {}", target.display()))?;
                    observer.file_copied(&target);
                }
                Ok(())
            }
        }
    }

    pub fn copy_prefixed(&self, dst: &Path, spec: &PrefixedCopy<'_>) -> Result<usize> {
        match self {
            Self::Directory(root) => copy_prefixed(root, dst, spec),
            Self::Memory(files) => {
                fs::create_dir_all(dst)
                    .with_context(|| format!("failed to create directory: {}", dst.display()))?;
                let mut copied = 0;
                for (relative, bytes) in files {
                    let (dir, file_name) = match relative.rsplit_once('/') {
                        Some((dir, name)) => (Some(dir), name),
                        None => (None, relative.as_str()),
                    };
                    if (dir.is_some() && !spec.recursive) || !spec.accepts(file_name) {
                        continue;
                    }
                    let target = dst.join(spec.target_name(file_name));
                    fs::write(&target, bytes)
                        .with_context(|| format!("failed to write {}", target.display()))?;
                    copied += 1;
                }
                Ok(copied)
            }
        }
    }

    fn memory_subtree(files: &BTreeMap<String, Vec<u8>>, prefix: &str) -> Self {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        Self::Memory(
            files
                .iter()
                .filter_map(|(path, bytes)| {
                    path.strip_prefix(&prefix)
                        .map(|relative| (relative.to_string(), bytes.clone()))
                })
                .collect(),
        )
    }
}

pub trait BundleSource {
    fn kind(&self) -> SourceKind;

    /// Human-readable origin, used in log lines.
    fn describe(&self) -> String;

    fn agents(&self) -> Result<SourceTree>;

    fn specify(&self) -> Result<SourceTree>;

    fn commands(&self) -> Result<SourceTree>;

    fn validate(&self) -> Result<()> {
        self.agents().context("agents validation failed")?;
        self.specify().context(".specify validation failed")?;
        self.commands().context("commands validation failed")?;
        Ok(())
    }

    fn manifest(&self) -> Result<VersionManifest> {
        let bytes = self.specify()?.read_file(MANIFEST_FILE)?;
        let content = String::from_utf8(bytes)
            .with_context(|| format!("{MANIFEST_FILE} is not valid UTF-8"))?;
        Ok(VersionManifest::from_json_str(&content)?)
    }
}

fn existing_dir(root: &Path, relative: &str, what: &str) -> Result<SourceTree> {
    let path = root.join(relative);
    if !path.is_dir() {
        return Err(Error::SourceMissing {
            path,
            detail: format!("{what} directory not found"),
        }
        .into());
    }
    Ok(SourceTree::Directory(path))
}

/// A local checkout of the bundle repository.
#[derive(Debug, Clone)]
pub struct RepositorySource {
    root: PathBuf,
}

impl RepositorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BundleSource for RepositorySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Repository
    }

    fn describe(&self) -> String {
        format!("repository at {}", self.root.display())
    }

    fn agents(&self) -> Result<SourceTree> {
        existing_dir(&self.root, AGENTS_DIR, "repository agents")
    }

    fn specify(&self) -> Result<SourceTree> {
        existing_dir(&self.root, SPECIFY_DIR, "repository .specify")
    }

    fn commands(&self) -> Result<SourceTree> {
        existing_dir(&self.root, COMMANDS_DIR, "repository commands")
    }

    fn validate(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(Error::SourceMissing {
                path: self.root.clone(),
                detail: "repository root not accessible".to_string(),
            }
            .into());
        }
        self.agents().context("repository agents validation failed")?;
        self.specify().context("repository .specify validation failed")?;
        self.commands().context("repository commands validation failed")?;
        Ok(())
    }
}

/// An already extracted release package, optionally pinned to a tree digest.
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    root: PathBuf,
    expected_integrity: Option<String>,
}

impl ArchiveSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            expected_integrity: None,
        }
    }

    /// Requires the extracted tree to hash to `token` (`sha256-<hex>`).
    pub fn with_integrity(mut self, token: impl Into<String>) -> Self {
        self.expected_integrity = Some(token.into());
        self
    }
}

impl BundleSource for ArchiveSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Archive
    }

    fn describe(&self) -> String {
        format!("extracted archive at {}", self.root.display())
    }

    fn agents(&self) -> Result<SourceTree> {
        existing_dir(&self.root, AGENTS_DIR, "archive agents")
    }

    fn specify(&self) -> Result<SourceTree> {
        existing_dir(&self.root, SPECIFY_DIR, "archive .specify")
    }

    fn commands(&self) -> Result<SourceTree> {
        existing_dir(&self.root, COMMANDS_DIR, "archive commands")
    }

    fn validate(&self) -> Result<()> {
        self.agents().context("archive agents validation failed")?;
        self.specify().context("archive .specify validation failed")?;
        self.commands().context("archive commands validation failed")?;

        if let Some(expected) = &self.expected_integrity {
            let Some(expected_digest) = parse_integrity_token(expected) else {
                bail!("invalid integrity token '{expected}' (expected sha256-<64 hex chars>)");
            };
            let actual = tree_digest_hex(&self.root, &[])?;
            if !actual.eq_ignore_ascii_case(expected_digest) {
                return Err(Error::IntegrityMismatch {
                    path: self.root.clone(),
                    expected: expected.clone(),
                    actual: format!("sha256-{actual}"),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Files handed to the binary as bytes, keyed by path relative to the bundle root.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedSource {
    files: BTreeMap<String, Vec<u8>>,
}

impl EmbeddedSource {
    pub fn new(files: BTreeMap<String, Vec<u8>>) -> Self {
        Self { files }
    }

    pub fn from_static(files: &[(&str, &[u8])]) -> Self {
        Self::new(
            files
                .iter()
                .map(|(path, bytes)| ((*path).to_string(), bytes.to_vec()))
                .collect(),
        )
    }

    fn subtree(&self, prefix: &str, what: &str) -> Result<SourceTree> {
        let tree = SourceTree::memory_subtree(&self.files, prefix);
        if matches!(&tree, SourceTree::Memory(files) if files.is_empty()) {
            return Err(Error::SourceMissing {
                path: PathBuf::from(prefix),
                detail: format!("no embedded {what} files"),
            }
            .into());
        }
        Ok(tree)
    }
}

impl BundleSource for EmbeddedSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Embedded
    }

    fn describe(&self) -> String {
        format!("embedded bundle ({} files)", self.files.len())
    }

    fn agents(&self) -> Result<SourceTree> {
        self.subtree(AGENTS_DIR, "agent")
    }

    fn specify(&self) -> Result<SourceTree> {
        self.subtree(SPECIFY_DIR, ".specify")
    }

    fn commands(&self) -> Result<SourceTree> {
        self.subtree(COMMANDS_DIR, "command")
    }
}
