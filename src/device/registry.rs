//! Device identification and session construction.

use super::drivers::{Driver, builtin_drivers, folder_driver};
use super::identity::{DetectedDevice, Platform};
use super::session::{DeviceSession, SessionSettings};
use super::{MountedPaths, SlotId};
use crate::cover::{CoverRenderer, ImageCoverRenderer};
use crate::error::{DeviceError, Result};
use crate::formats::ReaderRegistry;
use crate::fs::{DeviceFilesystem, LocalFilesystem};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

type BusySet = Arc<Mutex<HashSet<String>>>;

/// Marks a physical device as having an open session until dropped.
#[derive(Debug)]
pub(crate) struct BusyGuard {
    key: String,
    busy: BusySet,
}

impl BusyGuard {
    fn acquire(busy: &BusySet, key: String) -> Result<Self> {
        if !busy.lock().insert(key.clone()) {
            return Err(DeviceError::Busy(key));
        }
        Ok(Self {
            key,
            busy: busy.clone(),
        })
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.lock().remove(&self.key);
        tracing::debug!(key = %self.key, "Released device");
    }
}

/// Matches detected hardware to drivers and opens sessions.
///
/// Only one session may be open per physical device. A second open of the
/// same device fails with [`DeviceError::Busy`] until the first session is
/// ejected or dropped.
pub struct DeviceRegistry {
    drivers: Vec<Driver>,
    folder: Driver,
    busy: BusySet,
    settings: SessionSettings,
    readers: ReaderRegistry,
    covers: Arc<dyn CoverRenderer>,
}

impl DeviceRegistry {
    /// Registry over `drivers`, matched in the given order.
    pub fn new(drivers: Vec<Driver>) -> Self {
        Self {
            drivers,
            folder: folder_driver(),
            busy: Arc::default(),
            settings: SessionSettings::default(),
            readers: ReaderRegistry::builtin(),
            covers: Arc::new(ImageCoverRenderer::default()),
        }
    }

    /// Registry over the built-in drivers.
    pub fn builtin() -> Self {
        Self::new(builtin_drivers())
    }

    /// Appends drivers after the existing ones, so they match last.
    pub fn with_user_devices(mut self, drivers: Vec<Driver>) -> Self {
        self.drivers.extend(drivers);
        self
    }

    /// Settings given to every session.
    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Metadata readers given to every session.
    pub fn with_readers(mut self, readers: ReaderRegistry) -> Self {
        self.readers = readers;
        self
    }

    /// Cover renderer given to every session.
    pub fn with_cover_renderer(mut self, covers: Arc<dyn CoverRenderer>) -> Self {
        self.covers = covers;
        self
    }

    /// Hardware drivers in registration order.
    pub fn drivers(&self) -> &[Driver] {
        &self.drivers
    }

    /// Looks up a driver by name, including the folder device.
    pub fn driver(&self, name: &str) -> Option<&Driver> {
        self.drivers
            .iter()
            .chain(std::iter::once(&self.folder))
            .find(|d| d.name().eq_ignore_ascii_case(name))
    }

    /// First driver, in registration order, that handles the device.
    pub fn identify(&self, detected: &DetectedDevice) -> Option<&Driver> {
        let found = self
            .drivers
            .iter()
            .filter(|d| !d.is_folder())
            .find(|d| d.identity.matches(detected));
        match found {
            Some(driver) => tracing::debug!(driver = driver.name(), "Identified device"),
            None => tracing::debug!(?detected, "No driver matches device"),
        }
        found
    }

    /// Whether a session is open for `key`.
    pub fn is_busy(&self, key: &str) -> bool {
        self.busy.lock().contains(key)
    }

    /// Opens a session over mounted paths.
    ///
    /// Main memory must be mounted and be a directory. On Windows the
    /// driver's drive-sorting hook runs first. A card whose path is not a
    /// directory is treated as absent.
    pub fn open(&self, driver: &Driver, mut paths: MountedPaths) -> Result<DeviceSession> {
        if paths.platform == Platform::Windows {
            driver.capabilities.hooks.sort_drives(&mut paths);
        }

        let main = match &paths.main {
            Some(main) if main.is_dir() => main.clone(),
            Some(main) => {
                return Err(DeviceError::NotReady(format!(
                    "main memory {} is not a directory",
                    main.display()
                )));
            }
            None => return Err(DeviceError::NotReady("main memory is not mounted".into())),
        };

        let key = physical_key(&paths, &main)?;

        let mut backends: BTreeMap<SlotId, Box<dyn DeviceFilesystem>> = BTreeMap::new();
        for slot in SlotId::ALL {
            match paths.get(slot) {
                Some(path) if path.is_dir() => {
                    backends.insert(slot, Box::new(LocalFilesystem::new(path)));
                }
                Some(path) => {
                    tracing::warn!(%slot, path = %path.display(), "Slot path is not a directory, ignoring");
                }
                None => {}
            }
        }

        self.open_with_backends(driver, &key, backends)
    }

    /// Opens a session over explicit backends, e.g. protocol-based slots.
    pub fn open_with_backends(
        &self,
        driver: &Driver,
        key: &str,
        backends: BTreeMap<SlotId, Box<dyn DeviceFilesystem>>,
    ) -> Result<DeviceSession> {
        if !backends.contains_key(&SlotId::Main) {
            return Err(DeviceError::NotReady("main memory is not mounted".into()));
        }

        let guard = BusyGuard::acquire(&self.busy, key.to_string())?;
        tracing::info!(driver = driver.name(), key, slots = backends.len(), "Created device session");

        Ok(DeviceSession::new(driver.clone(), backends)
            .with_settings(self.settings.clone())
            .with_readers(self.readers.clone())
            .with_cover_renderer(self.covers.clone())
            .with_guard(guard))
    }

    /// Opens a host folder as a device.
    pub fn open_folder(&self, path: &Path) -> Result<DeviceSession> {
        if !path.is_dir() {
            return Err(DeviceError::NotReady(format!(
                "{} is not a folder",
                path.display()
            )));
        }
        let folder = self.folder.clone();
        let path = path.canonicalize()?;
        self.open(&folder, MountedPaths::main(path))
    }
}

/// Identifies the hardware behind a mount, whichever driver opens it.
fn physical_key(paths: &MountedPaths, main: &Path) -> Result<String> {
    match &paths.serial {
        Some(serial) => Ok(format!("serial:{}", serial)),
        None => Ok(format!("path:{}", main.canonicalize()?.display())),
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
