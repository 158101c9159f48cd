//! Deterministic names and content hashes.
//!
//! Staged copy/sync destinations are named by a UUIDv5 of the canonical
//! destination path, so the same destination always lands on the same staging
//! subdirectory no matter which call site produced it.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

/// Lexically normalize a path: make it absolute (relative paths are taken
/// from `/`), drop `.` components and fold `..` into their parent.
///
/// The path does not need to exist; container destinations usually don't
/// exist on the host.
pub fn canonical_destination(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

/// Staging subdirectory name for a copy or sync destination.
pub fn staging_name(destination: &Path) -> String {
    let canonical = canonical_destination(destination);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, canonical.to_string_lossy().as_bytes()).to_string()
}

/// Hex SHA-256 of arbitrary bytes.
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(bytes.as_ref()))
}

/// Stable host directory name for a direct mount source.
pub fn mount_hash(key: &str) -> String {
    let mut digest = sha256_hex(key);
    digest.truncate(32);
    digest
}

/// Order-independent hash over every file in a staged build context.
///
/// Combines `relative/path:sha256` entries sorted by path.
pub fn context_hash(dir: &Path) -> Result<String> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        let digest = sha256_hex(fs::read(entry.path())?);
        entries.push(format!("{}:{}", relative, digest));
    }
    entries.sort();
    Ok(sha256_hex(entries.join("\n")))
}
