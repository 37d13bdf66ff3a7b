//! Storage backends for device slots.
//!
//! A [`DeviceFilesystem`] is one storage area (main memory or a card) seen as a
//! tree of files addressed by `/`-separated paths relative to the slot root.
//! Two transports implement it:
//! - [`LocalFilesystem`]: a slot the OS has already mounted at a path
//! - [`MtpFilesystem`]: a slot reached through an object-based protocol
//!
//! The session layer only talks to the trait, so it never knows which one is
//! underneath.

mod local;
mod memory;
mod mtp;

pub use local::LocalFilesystem;
pub use memory::MemoryTransport;
pub use mtp::{MtpFilesystem, ObjectHandle, ObjectInfo, ObjectTransport};

use crate::error::{DeviceError, Result};
use serde::Serialize;
use std::path::Path;

/// A file on a device slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the slot root, `/` separated.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Modification time (unix seconds).
    pub mtime: i64,
}

/// Space information for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpaceInfo {
    /// Total capacity in bytes.
    pub total_bytes: u64,
    /// Available (free) space in bytes.
    pub free_bytes: u64,
}

/// Trait for slot file system operations.
///
/// All path parameters are relative to the slot root.
pub trait DeviceFilesystem: Send + Sync {
    /// Root of the slot, as shown to users.
    fn root(&self) -> &Path;

    /// Human readable description of the slot location.
    fn describe(&self) -> String {
        self.root().display().to_string()
    }

    /// Checks if a path exists.
    fn exists(&self, path: &str) -> bool;

    /// Checks if a path is an existing directory.
    fn is_dir(&self, path: &str) -> bool;

    /// Gets size and modification time of a file.
    fn stat(&self, path: &str) -> Result<FileEntry>;

    /// Lists files (not directories) under `dir`.
    fn list(&self, dir: &str, recursive: bool) -> Result<Vec<FileEntry>>;

    /// Reads a whole file.
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Writes a file, creating parent directories.
    fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Renames a file, replacing any existing destination.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Removes a file.
    fn remove_file(&self, path: &str) -> Result<()>;

    /// Removes an empty directory.
    fn remove_dir(&self, path: &str) -> Result<()>;

    /// Total and free space of the slot.
    fn space(&self) -> Result<SpaceInfo>;

    /// Writes a file so that readers see either the old or the new content.
    fn write_atomic(&self, path: &str, data: &[u8]) -> Result<()> {
        let tmp = temp_sibling(path);
        if let Err(e) = self.write(&tmp, data) {
            let _ = self.remove_file(&tmp);
            return Err(e);
        }
        self.rename(&tmp, path).inspect_err(|_| {
            let _ = self.remove_file(&tmp);
        })
    }

    /// Copies a host file onto the slot, never leaving a partial file at `path`.
    ///
    /// Returns the number of bytes copied.
    fn copy_in(&self, local: &Path, path: &str) -> Result<u64> {
        let data = std::fs::read(local)?;
        self.write_atomic(path, &data)?;
        Ok(data.len() as u64)
    }

    /// Removes `dir` and its ancestors while they are empty, stopping at `stop_at`.
    fn remove_empty_dirs(&self, dir: &str, stop_at: &str) {
        let stop_at = stop_at.trim_matches('/');
        let prefix = format!("{stop_at}/");
        let mut current = dir.trim_matches('/').to_string();
        while !current.is_empty() && (stop_at.is_empty() || current.starts_with(&prefix)) {
            if self.remove_dir(&current).is_err() {
                break;
            }
            current = parent(&current).to_string();
        }
    }
}

/// Join two device paths.
pub fn join(base: &str, name: &str) -> String {
    let base = base.trim_matches('/');
    let name = name.trim_matches('/');
    match (base.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{name}"),
    }
}

/// Parent of a device path (`""` for top-level entries).
pub fn parent(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit_once('/')
        .map(|(dir, _)| dir)
        .unwrap_or("")
}

/// Split a device path into validated components.
pub(crate) fn components(path: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = path
        .split(['/', '\\'])
        .filter(|c| !c.is_empty() && *c != ".")
        .collect();
    if parts.contains(&"..") {
        return Err(DeviceError::InvalidPath(path.to_string()));
    }
    Ok(parts)
}

/// Name for a temporary file next to `path`.
fn temp_sibling(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    join(
        parent(path),
        &format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()),
    )
}
