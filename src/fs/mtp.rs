//! Slots reached through an object-based transfer protocol.
//!
//! MTP-style devices do not expose paths. Storage is a tree of objects, each
//! with a numeric handle and a parent handle. [`MtpFilesystem`] resolves
//! device paths to handles one component at a time, so the session layer can
//! treat these devices like any mounted directory.

use super::{DeviceFilesystem, FileEntry, SpaceInfo, components, join, parent};
use crate::error::{DeviceError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Handle of one object within a storage.
pub type ObjectHandle = u32;

/// One object (file or folder) as reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object handle.
    pub handle: ObjectHandle,
    /// Parent folder, `None` for objects at the storage root.
    pub parent: Option<ObjectHandle>,
    /// File or folder name.
    pub name: String,
    /// Whether the object is a folder.
    pub is_folder: bool,
    /// Size in bytes (0 for folders).
    pub size: u64,
    /// Modification time (unix seconds).
    pub modified: i64,
}

/// Object-level operations a protocol transport provides.
///
/// Storage ids and handles are the transport's own; [`MtpFilesystem`] never
/// interprets them.
pub trait ObjectTransport: Send + Sync {
    /// Capacity of a storage.
    fn storage_info(&self, storage: u32) -> Result<SpaceInfo>;

    /// Children of `parent` (`None` lists the storage root).
    fn list_objects(&self, storage: u32, parent: Option<ObjectHandle>) -> Result<Vec<ObjectInfo>>;

    /// Downloads a file object.
    fn get_object(&self, handle: ObjectHandle) -> Result<Vec<u8>>;

    /// Uploads a new file object.
    fn send_object(
        &self,
        storage: u32,
        parent: Option<ObjectHandle>,
        name: &str,
        data: &[u8],
    ) -> Result<ObjectInfo>;

    /// Creates a folder object.
    fn create_folder(
        &self,
        storage: u32,
        parent: Option<ObjectHandle>,
        name: &str,
    ) -> Result<ObjectHandle>;

    /// Deletes an object. Folders must be empty.
    fn delete_object(&self, handle: ObjectHandle) -> Result<()>;

    /// Renames an object in place.
    fn rename_object(&self, handle: ObjectHandle, new_name: &str) -> Result<()>;
}

/// A slot backed by one storage of an object-based device.
pub struct MtpFilesystem<T: ObjectTransport> {
    transport: Arc<T>,
    storage_id: u32,
    root: PathBuf,
}

impl<T: ObjectTransport> MtpFilesystem<T> {
    /// Creates a file system for `storage_id` on the device `device_id`.
    pub fn new(transport: Arc<T>, device_id: &str, storage_id: u32) -> Self {
        Self {
            transport,
            storage_id,
            root: PathBuf::from(format!("mtp://{}/{}", device_id, storage_id)),
        }
    }

    fn child(&self, parent: Option<ObjectHandle>, name: &str) -> Result<Option<ObjectInfo>> {
        let children = self.transport.list_objects(self.storage_id, parent)?;
        Ok(children.into_iter().find(|o| o.name == name))
    }

    /// Resolves a path to its object. The empty path is the storage root (`None`).
    fn lookup(&self, path: &str) -> Result<Option<ObjectInfo>> {
        let mut current: Option<ObjectInfo> = None;
        for part in components(path)? {
            let parent = current.as_ref().map(|o| o.handle);
            match self.child(parent, part)? {
                Some(obj) => current = Some(obj),
                None => return Err(DeviceError::NotFound(path.to_string())),
            }
        }
        Ok(current)
    }

    fn lookup_file(&self, path: &str) -> Result<ObjectInfo> {
        match self.lookup(path)? {
            Some(obj) if !obj.is_folder => Ok(obj),
            _ => Err(DeviceError::NotFound(path.to_string())),
        }
    }

    /// Walks to `dir`, creating missing folders, and returns its handle.
    fn ensure_folder(&self, dir: &str) -> Result<Option<ObjectHandle>> {
        let mut current = None;
        for part in components(dir)? {
            current = match self.child(current, part)? {
                Some(obj) if obj.is_folder => Some(obj.handle),
                Some(_) => {
                    return Err(DeviceError::PathConflict(format!(
                        "{dir}: {part} is a file"
                    )));
                }
                None => {
                    tracing::debug!(storage = self.storage_id, folder = part, "Creating folder");
                    Some(self.transport.create_folder(self.storage_id, current, part)?)
                }
            };
        }
        Ok(current)
    }

    fn collect(&self, dir: &str, handle: Option<ObjectHandle>, recursive: bool, out: &mut Vec<FileEntry>) -> Result<()> {
        let mut children = self.transport.list_objects(self.storage_id, handle)?;
        children.sort_by(|a, b| a.name.cmp(&b.name));
        for obj in children {
            let path = join(dir, &obj.name);
            if obj.is_folder {
                if recursive {
                    self.collect(&path, Some(obj.handle), recursive, out)?;
                }
            } else {
                out.push(FileEntry {
                    path,
                    size: obj.size,
                    mtime: obj.modified,
                });
            }
        }
        Ok(())
    }
}

fn file_name(path: &str) -> Result<&str> {
    components(path)?
        .last()
        .copied()
        .ok_or_else(|| DeviceError::InvalidPath(path.to_string()))
}

impl<T: ObjectTransport> DeviceFilesystem for MtpFilesystem<T> {
    fn root(&self) -> &Path {
        &self.root
    }

    fn exists(&self, path: &str) -> bool {
        matches!(self.lookup(path), Ok(Some(_)))
    }

    fn is_dir(&self, path: &str) -> bool {
        match self.lookup(path) {
            Ok(Some(obj)) => obj.is_folder,
            Ok(None) => true,
            Err(_) => false,
        }
    }

    fn stat(&self, path: &str) -> Result<FileEntry> {
        let obj = self.lookup_file(path)?;
        Ok(FileEntry {
            path: path.trim_matches('/').to_string(),
            size: obj.size,
            mtime: obj.modified,
        })
    }

    fn list(&self, dir: &str, recursive: bool) -> Result<Vec<FileEntry>> {
        let handle = match self.lookup(dir) {
            Ok(Some(obj)) if obj.is_folder => Some(obj.handle),
            Ok(None) => None,
            Ok(Some(_)) => return Ok(Vec::new()),
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut out = Vec::new();
        self.collect(dir.trim_matches('/'), handle, recursive, &mut out)?;
        Ok(out)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let obj = self.lookup_file(path)?;
        self.transport.get_object(obj.handle)
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let name = file_name(path)?;
        let folder = self.ensure_folder(parent(path))?;

        // Objects cannot be overwritten in place.
        if let Some(existing) = self.child(folder, name)? {
            self.transport.delete_object(existing.handle)?;
        }
        self.transport.send_object(self.storage_id, folder, name, data)?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.lookup_file(from)?;
        let to_name = file_name(to)?;
        let folder = self.ensure_folder(parent(to))?;

        if let Some(existing) = self.child(folder, to_name)?
            && existing.handle != source.handle
        {
            self.transport.delete_object(existing.handle)?;
        }

        if folder == source.parent {
            return self.transport.rename_object(source.handle, to_name);
        }

        let data = self.transport.get_object(source.handle)?;
        self.transport.send_object(self.storage_id, folder, to_name, &data)?;
        self.transport.delete_object(source.handle)
    }

    fn remove_file(&self, path: &str) -> Result<()> {
        let obj = self.lookup_file(path)?;
        self.transport.delete_object(obj.handle)
    }

    fn remove_dir(&self, path: &str) -> Result<()> {
        match self.lookup(path)? {
            Some(obj) if obj.is_folder => {
                if !self.transport.list_objects(self.storage_id, Some(obj.handle))?.is_empty() {
                    return Err(DeviceError::Transport(format!("{path} is not empty")));
                }
                self.transport.delete_object(obj.handle)
            }
            _ => Err(DeviceError::NotFound(path.to_string())),
        }
    }

    fn space(&self) -> Result<SpaceInfo> {
        self.transport.storage_info(self.storage_id)
    }
}
