//! Per-model storage layout and format support.

use super::SlotId;
use super::hooks::DriverHooks;
use serde::Serialize;

/// Default name of the per-slot metadata cache file.
pub const DEFAULT_CACHE_NAME: &str = ".metadata.calibre";

/// Default thumbnail height for devices that do not declare one.
pub const DEFAULT_THUMBNAIL_HEIGHT: u32 = 68;

/// Static per-model configuration. Immutable for a session's lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceCapabilities {
    /// Lowercase extensions in the device's order of preference.
    pub supported_formats: Vec<String>,

    /// Formats the device only opens when DRM-free.
    pub drm_restricted_formats: Vec<String>,

    /// Whether books may live in nested directories.
    pub supports_subdirectories: bool,

    /// Book directory on main memory, relative to the slot root.
    pub main_dir: String,

    /// Book directory on the first card.
    pub card_a_dir: String,

    /// Book directory on the second card.
    pub card_b_dir: String,

    /// Cover thumbnail height in pixels.
    pub thumbnail_height: u32,

    /// Sidecar suffixes removed together with a book, appended to its path minus extension.
    pub auxiliary_delete_extensions: Vec<String>,

    /// Whether uploads also write a cover sidecar.
    pub supports_cover_upload: bool,

    /// Read metadata from file content even when the global setting is off.
    pub must_read_metadata: bool,

    /// Whether metadata on the device may be edited.
    pub can_set_metadata: bool,

    /// Cache file name at each slot root.
    pub metadata_cache_name: String,

    /// Per-model behaviour.
    pub hooks: DriverHooks,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            supported_formats: Vec::new(),
            drm_restricted_formats: Vec::new(),
            supports_subdirectories: false,
            main_dir: String::new(),
            card_a_dir: String::new(),
            card_b_dir: String::new(),
            thumbnail_height: DEFAULT_THUMBNAIL_HEIGHT,
            auxiliary_delete_extensions: Vec::new(),
            supports_cover_upload: false,
            must_read_metadata: false,
            can_set_metadata: false,
            metadata_cache_name: DEFAULT_CACHE_NAME.to_string(),
            hooks: DriverHooks::Generic,
        }
    }
}

impl DeviceCapabilities {
    /// Whether the device accepts files with this extension.
    pub fn supports_format(&self, ext: &str) -> bool {
        let ext = ext.trim_start_matches('.').to_lowercase();
        self.supported_formats.iter().any(|f| *f == ext)
    }

    /// Whether the format is only readable without DRM.
    pub fn is_drm_restricted(&self, ext: &str) -> bool {
        let ext = ext.trim_start_matches('.').to_lowercase();
        self.drm_restricted_formats.iter().any(|f| *f == ext)
    }

    /// Book directory for a slot.
    pub fn book_dir(&self, slot: SlotId) -> &str {
        let dir = match slot {
            SlotId::Main => &self.main_dir,
            SlotId::CardA => &self.card_a_dir,
            SlotId::CardB => &self.card_b_dir,
        };
        dir.trim_matches('/')
    }
}
