//! Devices, storage slots and sessions.
//!
//! A [`DeviceRegistry`] turns a detection event into a [`Driver`] and opens a
//! [`DeviceSession`] over the slots the platform has mounted. All listing,
//! upload and delete operations go through the session.

mod cache;
mod capabilities;
mod drivers;
mod hooks;
mod identity;
mod progress;
mod registry;
mod session;
mod upload_path;

pub use cache::{CACHE_VERSION, FileSignature, MetadataCache};
pub use capabilities::{DEFAULT_CACHE_NAME, DEFAULT_THUMBNAIL_HEIGHT, DeviceCapabilities};
pub use drivers::{Driver, FOLDER_DRIVER_NAME, builtin_drivers, folder_driver};
pub use hooks::{DriverHooks, NOOK_COVER_WIDTH};
pub use identity::{DetectedDevice, DeviceIdentity, LabelPattern, Platform, UnixStrings, UsbId};
pub use progress::{CancelToken, Operation, Progress, ProgressEvent};
pub use registry::DeviceRegistry;
pub use session::{
    BookIter, DeviceSession, SessionSettings, SessionState, UploadOptions, UploadOutcome,
    UploadRequest,
};
pub use upload_path::{MAX_PATH_LEN, create_upload_path, sanitize};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One of the storage areas a device may expose.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum SlotId {
    /// Internal memory. Always present.
    Main,
    /// First storage card.
    CardA,
    /// Second storage card.
    CardB,
}

impl SlotId {
    /// All slots, main first.
    pub const ALL: [SlotId; 3] = [SlotId::Main, SlotId::CardA, SlotId::CardB];

    /// Short name used in logs and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotId::Main => "main",
            SlotId::CardA => "card-a",
            SlotId::CardB => "card-b",
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mounted storage area and its capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageSlot {
    /// Which slot this is.
    pub id: SlotId,
    /// Root of the slot, `None` when absent.
    pub root: Option<PathBuf>,
    /// Free space in bytes.
    pub free_bytes: u64,
    /// Capacity in bytes.
    pub total_bytes: u64,
}

impl StorageSlot {
    /// A slot with no mounted root.
    pub fn absent(id: SlotId) -> Self {
        Self {
            id,
            root: None,
            free_bytes: 0,
            total_bytes: 0,
        }
    }

    /// Whether the slot has a root.
    pub fn is_present(&self) -> bool {
        self.root.is_some()
    }
}

/// Paths the platform has mounted for a detected device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountedPaths {
    /// Main memory mount point.
    pub main: Option<PathBuf>,
    /// First card mount point.
    pub card_a: Option<PathBuf>,
    /// Second card mount point.
    pub card_b: Option<PathBuf>,
    /// Device serial number, when the platform reports one.
    pub serial: Option<String>,
    /// Platform the paths come from.
    pub platform: Platform,
}

impl MountedPaths {
    /// Paths with only main memory mounted.
    pub fn main(path: impl Into<PathBuf>) -> Self {
        Self {
            main: Some(path.into()),
            ..Default::default()
        }
    }

    /// Mount point for a slot.
    pub fn get(&self, slot: SlotId) -> Option<&PathBuf> {
        match slot {
            SlotId::Main => self.main.as_ref(),
            SlotId::CardA => self.card_a.as_ref(),
            SlotId::CardB => self.card_b.as_ref(),
        }
    }

    fn slot_mut(&mut self, slot: SlotId) -> &mut Option<PathBuf> {
        match slot {
            SlotId::Main => &mut self.main,
            SlotId::CardA => &mut self.card_a,
            SlotId::CardB => &mut self.card_b,
        }
    }
}

/// Path of a book without its extension, the base sidecar names are built on.
pub fn base_path(path: &str) -> &str {
    let name_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[name_start..].rfind('.') {
        Some(dot) if dot > 0 => &path[..name_start + dot],
        _ => path,
    }
}
