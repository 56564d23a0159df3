use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kitlock_core::{Error, VersionLock};

pub fn load_version_lock(path: &Path) -> Result<VersionLock> {
    if !path.is_file() {
        return Err(Error::LockNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read version lock: {}", path.display()))?;
    let lock = VersionLock::from_json_str(&raw)
        .with_context(|| format!("failed to parse version lock: {}", path.display()))?;
    Ok(lock)
}

/// Validates, then replaces `path` through a synced sibling temp file.
pub fn save_version_lock(lock: &VersionLock, path: &Path) -> Result<()> {
    let content = lock
        .to_json_string()
        .with_context(|| format!("refusing to write invalid version lock: {}", path.display()))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    let tmp_path = temp_sibling(path);
    let write_result = (|| -> Result<()> {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync {}", tmp_path.display()))?;
        Ok(())
    })();
    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }

    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "failed to move version lock into place: {}",
            path.display()
        )
    })?;
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "version-lock".to_string());
    path.with_file_name(format!("{name}.tmp"))
}
