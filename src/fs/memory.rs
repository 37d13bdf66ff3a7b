//! In-memory object transport with a fixed capacity.

use super::SpaceInfo;
use super::mtp::{ObjectHandle, ObjectInfo, ObjectTransport};
use crate::error::{DeviceError, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;

struct Object {
    storage: u32,
    info: ObjectInfo,
    data: Vec<u8>,
}

struct State {
    objects: BTreeMap<ObjectHandle, Object>,
    next_handle: ObjectHandle,
}

/// An [`ObjectTransport`] holding everything in memory.
///
/// Every storage id shares one capacity. Uploads that do not fit fail the way
/// a full device does, leaving nothing behind.
pub struct MemoryTransport {
    capacity: u64,
    state: Mutex<State>,
}

impl MemoryTransport {
    /// Creates an empty transport with `capacity` bytes of storage.
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            state: Mutex::new(State {
                objects: BTreeMap::new(),
                next_handle: 1,
            }),
        }
    }

    /// Bytes currently stored.
    pub fn used_bytes(&self) -> u64 {
        self.state.lock().objects.values().map(|o| o.data.len() as u64).sum()
    }
}

impl State {
    fn check_parent(&self, parent: Option<ObjectHandle>) -> Result<()> {
        match parent {
            None => Ok(()),
            Some(h) => match self.objects.get(&h) {
                Some(o) if o.info.is_folder => Ok(()),
                _ => Err(DeviceError::Transport(format!("invalid parent object {h}"))),
            },
        }
    }

    fn check_name(&self, storage: u32, parent: Option<ObjectHandle>, name: &str) -> Result<()> {
        let taken = self
            .objects
            .values()
            .any(|o| o.storage == storage && o.info.parent == parent && o.info.name == name);
        if taken {
            return Err(DeviceError::Transport(format!("object {name} already exists")));
        }
        Ok(())
    }

    fn insert(&mut self, storage: u32, info: ObjectInfo, data: Vec<u8>) -> ObjectInfo {
        let handle = self.next_handle;
        self.next_handle += 1;
        let info = ObjectInfo { handle, ..info };
        self.objects.insert(
            handle,
            Object {
                storage,
                info: info.clone(),
                data,
            },
        );
        info
    }
}

impl ObjectTransport for MemoryTransport {
    fn storage_info(&self, _storage: u32) -> Result<SpaceInfo> {
        Ok(SpaceInfo {
            total_bytes: self.capacity,
            free_bytes: self.capacity.saturating_sub(self.used_bytes()),
        })
    }

    fn list_objects(&self, storage: u32, parent: Option<ObjectHandle>) -> Result<Vec<ObjectInfo>> {
        let state = self.state.lock();
        state.check_parent(parent)?;
        Ok(state
            .objects
            .values()
            .filter(|o| o.storage == storage && o.info.parent == parent)
            .map(|o| o.info.clone())
            .collect())
    }

    fn get_object(&self, handle: ObjectHandle) -> Result<Vec<u8>> {
        let state = self.state.lock();
        match state.objects.get(&handle) {
            Some(o) if !o.info.is_folder => Ok(o.data.clone()),
            _ => Err(DeviceError::NotFound(format!("object {handle}"))),
        }
    }

    fn send_object(
        &self,
        storage: u32,
        parent: Option<ObjectHandle>,
        name: &str,
        data: &[u8],
    ) -> Result<ObjectInfo> {
        let mut state = self.state.lock();
        state.check_parent(parent)?;
        state.check_name(storage, parent, name)?;

        let used: u64 = state.objects.values().map(|o| o.data.len() as u64).sum();
        if used + data.len() as u64 > self.capacity {
            return Err(DeviceError::Transport(format!(
                "storage full: {} bytes requested, {} free",
                data.len(),
                self.capacity.saturating_sub(used)
            )));
        }

        let info = ObjectInfo {
            handle: 0,
            parent,
            name: name.to_string(),
            is_folder: false,
            size: data.len() as u64,
            modified: chrono::Utc::now().timestamp(),
        };
        Ok(state.insert(storage, info, data.to_vec()))
    }

    fn create_folder(
        &self,
        storage: u32,
        parent: Option<ObjectHandle>,
        name: &str,
    ) -> Result<ObjectHandle> {
        let mut state = self.state.lock();
        state.check_parent(parent)?;
        state.check_name(storage, parent, name)?;

        let info = ObjectInfo {
            handle: 0,
            parent,
            name: name.to_string(),
            is_folder: true,
            size: 0,
            modified: chrono::Utc::now().timestamp(),
        };
        Ok(state.insert(storage, info, Vec::new()).handle)
    }

    fn delete_object(&self, handle: ObjectHandle) -> Result<()> {
        let mut state = self.state.lock();
        if state.objects.values().any(|o| o.info.parent == Some(handle)) {
            return Err(DeviceError::Transport(format!("folder {handle} is not empty")));
        }
        state
            .objects
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| DeviceError::NotFound(format!("object {handle}")))
    }

    fn rename_object(&self, handle: ObjectHandle, new_name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let (storage, parent) = match state.objects.get(&handle) {
            Some(o) => (o.storage, o.info.parent),
            None => return Err(DeviceError::NotFound(format!("object {handle}"))),
        };
        state.check_name(storage, parent, new_name)?;
        if let Some(o) = state.objects.get_mut(&handle) {
            o.info.name = new_name.to_string();
        }
        Ok(())
    }
}
