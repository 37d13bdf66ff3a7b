//! Slots mounted into the host file system.

use super::{DeviceFilesystem, FileEntry, SpaceInfo, components, temp_sibling};
use crate::error::{DeviceError, Result};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// A slot backed by a directory the OS has mounted.
#[derive(Debug, Clone)]
pub struct LocalFilesystem {
    root: PathBuf,
    capacity_override: Option<SpaceInfo>,
}

impl LocalFilesystem {
    /// Creates a file system rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            capacity_override: None,
        }
    }

    /// Reports `space` instead of querying the disk.
    pub fn with_capacity(mut self, space: SpaceInfo) -> Self {
        self.capacity_override = Some(space);
        self
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut full = self.root.clone();
        for part in components(path)? {
            full.push(part);
        }
        Ok(full)
    }

    fn relative(&self, full: &Path) -> Option<String> {
        let rel = full.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    fn entry(&self, path: String, meta: &std::fs::Metadata) -> FileEntry {
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        FileEntry {
            path,
            size: meta.len(),
            mtime,
        }
    }

    /// Gets space information for the disk holding the root.
    fn disk_space(&self) -> Result<SpaceInfo> {
        let root = self.root.canonicalize()?;
        let disks = sysinfo::Disks::new_with_refreshed_list();

        disks
            .list()
            .iter()
            .filter(|disk| root.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| SpaceInfo {
                total_bytes: disk.total_space(),
                free_bytes: disk.available_space(),
            })
            .ok_or_else(|| {
                DeviceError::NotReady(format!("no mounted disk holds {}", self.root.display()))
            })
    }
}

impl DeviceFilesystem for LocalFilesystem {
    fn root(&self) -> &Path {
        &self.root
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    fn is_dir(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_dir()).unwrap_or(false)
    }

    fn stat(&self, path: &str) -> Result<FileEntry> {
        let full = self.resolve(path)?;
        let meta = std::fs::metadata(&full)?;
        Ok(self.entry(path.trim_matches('/').to_string(), &meta))
    }

    fn list(&self, dir: &str, recursive: bool) -> Result<Vec<FileEntry>> {
        let base = self.resolve(dir)?;
        if !base.is_dir() {
            return Ok(Vec::new());
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let files = walkdir::WalkDir::new(&base)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| match e {
                Ok(e) => Some(e),
                Err(err) => {
                    tracing::debug!(error = %err, "Skipping unreadable entry");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let meta = e.metadata().ok()?;
                let rel = self.relative(e.path())?;
                Some(self.entry(rel, &meta))
            })
            .collect();

        Ok(files)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.resolve(path)?)?)
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(full, data)?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let to = self.resolve(to)?;
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(self.resolve(from)?, to)?;
        Ok(())
    }

    fn remove_file(&self, path: &str) -> Result<()> {
        std::fs::remove_file(self.resolve(path)?)?;
        Ok(())
    }

    fn remove_dir(&self, path: &str) -> Result<()> {
        std::fs::remove_dir(self.resolve(path)?)?;
        Ok(())
    }

    fn space(&self) -> Result<SpaceInfo> {
        match self.capacity_override {
            Some(space) => Ok(space),
            None => self.disk_space(),
        }
    }

    fn copy_in(&self, local: &Path, path: &str) -> Result<u64> {
        let tmp = temp_sibling(path);
        let tmp_full = self.resolve(&tmp)?;
        if let Some(parent) = tmp_full.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let copied = match std::fs::copy(local, &tmp_full) {
            Ok(n) => n,
            Err(e) => {
                let _ = std::fs::remove_file(&tmp_full);
                return Err(e.into());
            }
        };

        if let Err(e) = std::fs::rename(&tmp_full, self.resolve(path)?) {
            let _ = std::fs::remove_file(&tmp_full);
            return Err(e.into());
        }
        Ok(copied)
    }
}
