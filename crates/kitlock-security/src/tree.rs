use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::checksum::{sha256_file_hex, sha256_hex};

const TOKEN_PREFIX: &str = "sha256-";

/// Digest of every regular file below `root`, keyed by `/`-separated relative
/// path and visited in sorted order so the result does not depend on
/// directory enumeration. Relative paths listed in `exclude` are skipped.
pub fn tree_digest_hex(root: &Path, exclude: &[&str]) -> Result<String> {
    let mut files = Vec::new();
    collect_files(root, root, &mut files)?;
    files.sort();

    let mut entries = Vec::with_capacity(files.len());
    for (relative, path) in files {
        if exclude.contains(&relative.as_str()) {
            continue;
        }
        let file_digest = sha256_file_hex(&path)?;
        entries.push((relative, file_digest));
    }
    Ok(combine_entries(entries))
}

/// Same digest as [`tree_digest_hex`] for files held in memory, keyed by
/// `/`-separated relative path.
pub fn files_digest_hex<'a, I>(files: I, exclude: &[&str]) -> String
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut entries = files
        .into_iter()
        .filter(|(relative, _)| !exclude.contains(relative))
        .map(|(relative, bytes)| (relative.to_string(), sha256_hex(bytes)))
        .collect::<Vec<_>>();
    entries.sort();
    combine_entries(entries)
}

fn combine_entries(entries: Vec<(String, String)>) -> String {
    let mut hasher = Sha256::new();
    for (relative, file_digest) in entries {
        hasher.update(relative.as_bytes());
        hasher.update([0_u8]);
        hasher.update(file_digest.as_bytes());
        hasher.update([0_u8]);
    }
    hex::encode(hasher.finalize())
}

pub fn tree_integrity_token(root: &Path, exclude: &[&str]) -> Result<String> {
    tree_digest_hex(root, exclude).map(|digest| integrity_token(&digest))
}

pub fn integrity_token(digest_hex: &str) -> String {
    format!("{TOKEN_PREFIX}{}", digest_hex.to_ascii_lowercase())
}

/// Returns the hex digest of a `sha256-<hex>` token.
pub fn parse_integrity_token(token: &str) -> Option<&str> {
    token
        .strip_prefix(TOKEN_PREFIX)
        .filter(|digest| digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit()))
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(String, PathBuf)>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to iterate {}", dir.display()))?;
        let path = entry.path();
        let metadata = fs::metadata(&path)
            .with_context(|| format!("failed to stat {}", path.display()))?;
        if metadata.is_dir() {
            collect_files(root, &path, out)?;
        } else if metadata.is_file() {
            let relative = path
                .strip_prefix(root)
                .with_context(|| format!("{} escapes {}", path.display(), root.display()))?;
            let key = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push((key, path));
        }
    }
    Ok(())
}
