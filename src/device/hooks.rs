//! Per-model behaviour selected by a variant tag.

use super::{MountedPaths, base_path};
use crate::book::BookMetadata;
use crate::cover::{CoverRenderer, encode_t2b, generate_default_cover};
use crate::error::Result;
use crate::fs::DeviceFilesystem;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Width of the Nook cover sidecar.
pub const NOOK_COVER_WIDTH: u32 = 96;

static WIRELESS_FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<title>[^-]+)-asin_(?P<asin>[a-zA-Z\d]{10,})-type_(?P<type>\w{4})-v_(?P<index>\d+).*",
    )
    .expect("valid regex")
});

/// Behaviour that differs between device models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriverHooks {
    /// No cover sidecar, no drive sorting.
    #[default]
    Generic,
    /// JPEG cover sidecar, Windows drive sorting.
    Nook,
    /// T2B thumbnail sidecar.
    Cybook,
    /// Windows drive sorting.
    Eb600,
    /// Title recovery for wirelessly delivered books.
    Kindle,
    /// A host folder used as a device.
    Folder,
}

impl DriverHooks {
    /// Whether this model writes a cover sidecar on upload.
    pub fn writes_cover(&self) -> bool {
        matches!(self, DriverHooks::Nook | DriverHooks::Cybook)
    }

    /// Writes the cover sidecar for the book at `book_path`.
    ///
    /// Returns the sidecar path, or `None` when this model has no cover file.
    pub fn upload_cover(
        &self,
        fs: &dyn DeviceFilesystem,
        book_path: &str,
        metadata: &BookMetadata,
        renderer: &dyn CoverRenderer,
        thumbnail_height: u32,
    ) -> Result<Option<String>> {
        let base = base_path(book_path);
        match self {
            DriverHooks::Nook => {
                let source = match &metadata.cover {
                    Some(cover) => cover.clone(),
                    None => generate_default_cover(&metadata.title),
                };
                let jpeg = renderer.render_cover(&source, Some(NOOK_COVER_WIDTH), thumbnail_height)?;
                let path = format!("{base}.jpg");
                fs.write(&path, &jpeg)?;
                Ok(Some(path))
            }
            DriverHooks::Cybook => {
                let path = format!("{base}_6090.t2b");
                fs.write(&path, &encode_t2b(metadata.cover.as_deref()))?;
                Ok(Some(path))
            }
            _ => Ok(None),
        }
    }

    /// Swaps main memory and card when Windows assigned them out of order.
    pub fn sort_drives(&self, paths: &mut MountedPaths) {
        if !matches!(self, DriverHooks::Nook | DriverHooks::Eb600) {
            return;
        }
        if let (Some(main), Some(card)) = (&paths.main, &paths.card_a)
            && card < main
        {
            tracing::debug!(main = %main.display(), card = %card.display(), "Swapping drives");
            std::mem::swap(&mut paths.main, &mut paths.card_a);
        }
    }

    /// Fixes up metadata derived for the file `file_name`.
    pub fn adjust_metadata(&self, file_name: &str, metadata: &mut BookMetadata) {
        if *self != DriverHooks::Kindle {
            return;
        }
        let looks_wireless = metadata.title.contains("-asin") && metadata.title.contains("-type");
        if (metadata.has_unknown_title() || looks_wireless)
            && let Some(caps) = WIRELESS_FILE_NAME.captures(file_name)
        {
            metadata.title = caps["title"].to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Platform;
    use std::path::PathBuf;

    #[test]
    fn test_kindle_wireless_title() {
        let name = "Dracula-asin_B000FC1BN8-type_EBOK-v_0.azw";
        let mut mi = BookMetadata::from_file_name(name);
        DriverHooks::Kindle.adjust_metadata(name, &mut mi);
        assert_eq!(mi.title, "Dracula");

        let mut kept = BookMetadata::new("Real Title");
        DriverHooks::Kindle.adjust_metadata(name, &mut kept);
        assert_eq!(kept.title, "Real Title");

        let mut generic = BookMetadata::from_file_name(name);
        DriverHooks::Generic.adjust_metadata(name, &mut generic);
        assert_ne!(generic.title, "Dracula");
    }

    #[test]
    fn test_sort_drives_swaps_out_of_order_card() {
        let mut paths = MountedPaths {
            main: Some(PathBuf::from("F:\\")),
            card_a: Some(PathBuf::from("E:\\")),
            platform: Platform::Windows,
            ..Default::default()
        };
        DriverHooks::Eb600.sort_drives(&mut paths);
        assert_eq!(paths.main, Some(PathBuf::from("E:\\")));
        assert_eq!(paths.card_a, Some(PathBuf::from("F:\\")));

        DriverHooks::Kindle.sort_drives(&mut paths);
        assert_eq!(paths.main, Some(PathBuf::from("E:\\")));
    }
}
