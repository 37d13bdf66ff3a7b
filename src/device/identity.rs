//! Matching detected hardware against device models.

use super::{MountedPaths, SlotId};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Host platform a detection event comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Windows: volumes are identified by PnP device ids.
    Windows,
    /// macOS: volumes are identified by IOMedia descriptions.
    Macos,
    /// Linux and other Unix systems.
    Unix,
}

impl Platform {
    /// Platform this process runs on.
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::Macos
        } else {
            Platform::Unix
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}

/// One USB (vendor, product, BCD) triple. `bcd: None` accepts any revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct UsbId {
    /// USB vendor id.
    pub vendor_id: u16,
    /// USB product id.
    pub product_id: u16,
    /// Device release number.
    pub bcd: Option<u16>,
}

impl UsbId {
    /// Expands id lists into every (vendor, product, bcd) combination.
    pub fn expand(vendors: &[u16], products: &[u16], bcds: &[u16]) -> Vec<UsbId> {
        let bcds: Vec<Option<u16>> = if bcds.is_empty() {
            vec![None]
        } else {
            bcds.iter().copied().map(Some).collect()
        };

        let mut ids = Vec::with_capacity(vendors.len() * products.len() * bcds.len());
        for &vendor_id in vendors {
            for &product_id in products {
                for &bcd in &bcds {
                    ids.push(UsbId {
                        vendor_id,
                        product_id,
                        bcd,
                    });
                }
            }
        }
        ids
    }

    fn matches(&self, vendor_id: u16, product_id: u16, bcd: Option<u16>) -> bool {
        if self.vendor_id != vendor_id || self.product_id != product_id {
            return false;
        }
        match (self.bcd, bcd) {
            (Some(expected), Some(reported)) => expected == reported,
            _ => true,
        }
    }
}

/// A volume label / PnP id pattern.
#[derive(Debug, Clone)]
pub enum LabelPattern {
    /// Matches when any of the strings appears in the candidate.
    Substrings(Vec<String>),
    /// Matches when the regex is found in the candidate.
    Regex(Regex),
}

impl LabelPattern {
    /// Pattern matching any of `values`.
    pub fn any(values: &[&str]) -> Self {
        LabelPattern::Substrings(values.iter().map(|s| s.to_string()).collect())
    }

    /// Pattern from a regular expression.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(LabelPattern::Regex(Regex::new(pattern)?))
    }

    /// Whether `candidate` matches.
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            LabelPattern::Substrings(values) => values.iter().any(|v| candidate.contains(v.as_str())),
            LabelPattern::Regex(re) => re.is_match(candidate),
        }
    }

    /// Windows PnP id rule: the id must name the vendor, then carry one of the
    /// product strings as `PROD_<value>` (or match the regex).
    pub fn matches_pnp(&self, vendor_name: &str, pnp_id: &str) -> bool {
        let pnp_id = pnp_id.to_uppercase();
        if !pnp_id.contains(&format!("VEN_{}", vendor_name.to_uppercase())) {
            return false;
        }
        match self {
            LabelPattern::Substrings(values) => values
                .iter()
                .any(|v| pnp_id.contains(&format!("PROD_{}", v.to_uppercase()))),
            LabelPattern::Regex(re) => re.is_match(&pnp_id),
        }
    }
}

/// Manufacturer and product strings a Unix host must report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnixStrings {
    /// Required manufacturer string.
    pub manufacturer: String,
    /// Accepted product strings.
    pub products: Vec<String>,
}

/// Immutable descriptor of a device model used for matching.
#[derive(Debug, Clone, Default)]
pub struct DeviceIdentity {
    /// Driver name, e.g. `Kindle Device Interface`.
    pub name: String,
    /// PnP vendor string.
    pub vendor_name: String,
    /// USB ids handled by this model.
    pub usb_ids: Vec<UsbId>,
    /// Windows PnP pattern for main memory.
    pub windows_main_mem: Option<LabelPattern>,
    /// Windows PnP pattern for the first card.
    pub windows_card_a_mem: Option<LabelPattern>,
    /// Windows PnP pattern for the second card.
    pub windows_card_b_mem: Option<LabelPattern>,
    /// macOS media pattern for main memory.
    pub osx_main_mem: Option<LabelPattern>,
    /// macOS media pattern for the first card.
    pub osx_card_a_mem: Option<LabelPattern>,
    /// macOS media pattern for the second card.
    pub osx_card_b_mem: Option<LabelPattern>,
    /// Extra Unix manufacturer/product check.
    pub unix_strings: Option<UnixStrings>,
    /// Label shown for main memory.
    pub main_volume_label: String,
    /// Label shown for cards.
    pub card_volume_label: String,
}

/// A device presence event reported by the platform layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectedDevice {
    /// A USB device appeared on the bus.
    Usb {
        /// USB vendor id.
        vendor_id: u16,
        /// USB product id.
        product_id: u16,
        /// Device release number, when reported.
        bcd: Option<u16>,
        /// Manufacturer string.
        manufacturer: Option<String>,
        /// Product string.
        product: Option<String>,
        /// Reporting platform.
        platform: Platform,
    },
    /// A storage volume appeared.
    Volume {
        /// PnP id (Windows) or media description / volume name (macOS).
        label: String,
        /// Reporting platform.
        platform: Platform,
    },
}

impl DeviceIdentity {
    /// Whether this model handles the detected device.
    pub fn matches(&self, detected: &DetectedDevice) -> bool {
        match detected {
            DetectedDevice::Usb {
                vendor_id,
                product_id,
                bcd,
                manufacturer,
                product,
                platform,
            } => {
                let id_match = self
                    .usb_ids
                    .iter()
                    .any(|id| id.matches(*vendor_id, *product_id, *bcd));
                id_match && (*platform != Platform::Unix || self.unix_check(manufacturer, product))
            }
            DetectedDevice::Volume { label, platform } => {
                self.slot_for_volume(label, *platform).is_some()
            }
        }
    }

    fn unix_check(&self, manufacturer: &Option<String>, product: &Option<String>) -> bool {
        let Some(strings) = &self.unix_strings else {
            return true;
        };
        manufacturer.as_deref() == Some(strings.manufacturer.as_str())
            && product
                .as_deref()
                .is_some_and(|p| strings.products.iter().any(|x| x == p))
    }

    fn volume_pattern(&self, slot: SlotId, platform: Platform) -> Option<&LabelPattern> {
        let pattern = match (platform, slot) {
            (Platform::Windows, SlotId::Main) => &self.windows_main_mem,
            (Platform::Windows, SlotId::CardA) => &self.windows_card_a_mem,
            (Platform::Windows, SlotId::CardB) => &self.windows_card_b_mem,
            (Platform::Macos, SlotId::Main) => &self.osx_main_mem,
            (Platform::Macos, SlotId::CardA) => &self.osx_card_a_mem,
            (Platform::Macos, SlotId::CardB) => &self.osx_card_b_mem,
            (Platform::Unix, _) => return None,
        };
        pattern.as_ref()
    }

    fn volume_matches(&self, slot: SlotId, label: &str, platform: Platform) -> bool {
        self.volume_pattern(slot, platform)
            .is_some_and(|p| match platform {
                Platform::Windows => p.matches_pnp(&self.vendor_name, label),
                _ => p.matches(label),
            })
    }

    /// Which slot a volume belongs to, if it belongs to this model at all.
    ///
    /// Card patterns are tried before main memory.
    pub fn slot_for_volume(&self, label: &str, platform: Platform) -> Option<SlotId> {
        [SlotId::CardA, SlotId::CardB, SlotId::Main]
            .into_iter()
            .find(|slot| self.volume_matches(*slot, label, platform))
    }

    /// Assigns mounted volumes to slots.
    ///
    /// Each volume takes the first free slot whose pattern it matches, trying
    /// card A, card B, then main memory. Models whose card and main patterns
    /// are identical depend on [`DriverHooks::sort_drives`](super::DriverHooks::sort_drives)
    /// afterwards.
    pub fn assign_volumes(&self, volumes: &[(String, PathBuf)], platform: Platform) -> MountedPaths {
        let mut paths = MountedPaths {
            platform,
            ..Default::default()
        };
        for (label, path) in volumes {
            for slot in [SlotId::CardA, SlotId::CardB, SlotId::Main] {
                let target = paths.slot_mut(slot);
                if target.is_none() && self.volume_matches(slot, label, platform) {
                    *target = Some(path.clone());
                    break;
                }
            }
        }
        paths
    }
}
