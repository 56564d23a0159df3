use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};

/// Receives per-file notifications from long tree copies.
pub trait CopyObserver {
    fn begin(&self, _label: &str, _total_files: u64) {}

    fn file_copied(&self, _path: &Path) {}

    fn finish(&self) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl CopyObserver for NoProgress {}

/// Selects and renames files for a flat copy into an integration directory.
#[derive(Debug, Clone, Copy)]
pub struct PrefixedCopy<'a> {
    pub prefix: &'a str,
    pub extension: Option<&'a str>,
    /// Walk subdirectories, flattening matches into the destination.
    pub recursive: bool,
}

impl PrefixedCopy<'_> {
    pub(crate) fn accepts(&self, file_name: &str) -> bool {
        match self.extension {
            Some(extension) => Path::new(file_name)
                .extension()
                .and_then(|value| value.to_str())
                .is_some_and(|value| value == extension),
            None => true,
        }
    }

    pub(crate) fn target_name(&self, file_name: &str) -> String {
        format!("{}{file_name}", self.prefix)
    }
}

pub fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

pub fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)?;
    }
    Ok(())
}

/// Recursively copies `src` into `dst`, keeping file and directory permissions.
pub fn copy_tree(src: &Path, dst: &Path, observer: &dyn CopyObserver) -> Result<()> {
    let metadata = fs::symlink_metadata(src)
        .with_context(|| format!("failed to stat source path: {}", src.display()))?;

    if metadata.is_dir() {
        fs::create_dir_all(dst)
            .with_context(|| format!("failed to create directory: {}", dst.display()))?;
        for entry in fs::read_dir(src)
            .with_context(|| format!("failed to read directory: {}", src.display()))?
        {
            let entry =
                entry.with_context(|| format!("failed to iterate directory: {}", src.display()))?;
            copy_tree(&entry.path(), &dst.join(entry.file_name()), observer)?;
        }
        fs::set_permissions(dst, metadata.permissions())
            .with_context(|| format!("failed to set permissions on {}", dst.display()))?;
        return Ok(());
    }

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    #[cfg(unix)]
    if metadata.file_type().is_symlink() {
        let target = fs::read_link(src)
            .with_context(|| format!("failed to read symlink: {}", src.display()))?;
        std::os::unix::fs::symlink(&target, dst).with_context(|| {
            format!(
                "failed to copy symlink {} -> {}",
                dst.display(),
                target.display()
            )
        })?;
        observer.file_copied(dst);
        return Ok(());
    }

    fs::copy(src, dst)
        .with_context(|| format!("failed to copy {} to {}", src.display(), dst.display()))?;
    observer.file_copied(dst);
    Ok(())
}

/// Copies matching files from `src_dir` into `dst_dir` under prefixed names.
/// Returns the number of files written.
pub fn copy_prefixed(src_dir: &Path, dst_dir: &Path, spec: &PrefixedCopy<'_>) -> Result<usize> {
    fs::create_dir_all(dst_dir)
        .with_context(|| format!("failed to create directory: {}", dst_dir.display()))?;

    let mut copied = 0;
    for entry in fs::read_dir(src_dir)
        .with_context(|| format!("failed to read directory: {}", src_dir.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to iterate directory: {}", src_dir.display()))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .with_context(|| format!("failed to stat {}", path.display()))?;

        if file_type.is_dir() {
            if spec.recursive {
                copied += copy_prefixed(&path, dst_dir, spec)?;
            }
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().into_owned();
        if !spec.accepts(&file_name) {
            continue;
        }
        let target = dst_dir.join(spec.target_name(&file_name));
        fs::copy(&path, &target)
            .with_context(|| format!("failed to copy {} to {}", path.display(), target.display()))?;
        copied += 1;
    }
    Ok(copied)
}

pub fn count_files(dir: &Path) -> Result<u64> {
    let mut count = 0;
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to iterate directory: {}", dir.display()))?;
        let file_type = entry
            .file_type()
            .with_context(|| format!("failed to stat {}", entry.path().display()))?;
        if file_type.is_dir() {
            count += count_files(&entry.path())?;
        } else {
            count += 1;
        }
    }
    Ok(count)
}

pub fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to iterate directory: {}", dir.display()))?;
        let metadata = fs::symlink_metadata(entry.path())
            .with_context(|| format!("failed to stat {}", entry.path().display()))?;
        if metadata.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }
    Ok(total)
}

/// True when `dir` directly contains at least one regular file.
pub fn has_files(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .any(|entry| entry.file_type().is_ok_and(|kind| kind.is_file()))
        })
        .unwrap_or(false)
}

pub fn format_size(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut divisor = UNIT;
    let mut exponent = 0;
    while bytes / divisor >= UNIT && exponent < 4 {
        divisor *= UNIT;
        exponent += 1;
    }
    let suffix = ["KB", "MB", "GB", "TB", "PB"][exponent];
    format!("{:.1} {suffix}", bytes as f64 / divisor as f64)
}
