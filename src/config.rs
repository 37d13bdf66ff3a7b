use crate::cover::{DEFAULT_QUALITY, ImageCoverRenderer};
use crate::device::{
    DEFAULT_THUMBNAIL_HEIGHT, DeviceCapabilities, DeviceIdentity, DeviceRegistry, Driver,
    DriverHooks, Platform, SessionSettings, SlotId, UsbId,
};
use crate::error::{DeviceError, Result};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Manage books on e-book reader devices.
#[derive(Parser, Debug, Clone)]
#[command(name = "ebook-device")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "EBOOK_DEVICE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a default config file.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },

    /// List known device drivers in matching order.
    Drivers,

    /// Find the driver for a USB device or volume.
    Identify {
        /// USB vendor id (hex).
        #[arg(long, value_parser = parse_hex_id)]
        vendor: Option<u16>,
        /// USB product id (hex).
        #[arg(long, value_parser = parse_hex_id)]
        product: Option<u16>,
        /// Device release number (hex).
        #[arg(long, value_parser = parse_hex_id)]
        bcd: Option<u16>,
        /// Manufacturer string reported by the device.
        #[arg(long)]
        manufacturer: Option<String>,
        /// Product string reported by the device.
        #[arg(long = "product-name")]
        product_name: Option<String>,
        /// Volume label or PnP id, instead of USB ids.
        #[arg(long)]
        label: Option<String>,
        /// Platform the ids come from (defaults to this host).
        #[arg(long, value_enum)]
        platform: Option<Platform>,
    },

    /// List books on a device.
    List {
        /// Device to open.
        #[command(flatten)]
        device: DeviceArgs,
        /// Only list this slot.
        #[arg(long, value_enum)]
        slot: Option<SlotId>,
    },

    /// Upload books to a device.
    Upload {
        /// Book files to upload.
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Device to open.
        #[command(flatten)]
        device: DeviceArgs,
        /// Target slot.
        #[arg(long, value_enum, default_value = "main")]
        slot: SlotId,
        /// Replace books already on the device.
        #[arg(long)]
        overwrite: bool,
    },

    /// Delete books from a device.
    Delete {
        /// Device relative paths, as shown by `list`.
        #[arg(required = true)]
        paths: Vec<String>,
        /// Device to open.
        #[command(flatten)]
        device: DeviceArgs,
        /// Slot holding the books.
        #[arg(long, value_enum, default_value = "main")]
        slot: SlotId,
    },
}

/// How to reach the device a command works on.
#[derive(Args, Debug, Clone, Default)]
pub struct DeviceArgs {
    /// Host folder (or a name from `[[folders]]`) to use as a device.
    #[arg(long, conflicts_with = "driver")]
    pub folder: Option<String>,

    /// Driver name, see `drivers`.
    #[arg(long)]
    pub driver: Option<String>,

    /// Mount point of main memory.
    #[arg(long, requires = "driver")]
    pub main: Option<PathBuf>,

    /// Mount point of the first card.
    #[arg(long = "card-a", requires = "driver")]
    pub card_a: Option<PathBuf>,

    /// Mount point of the second card.
    #[arg(long = "card-b", requires = "driver")]
    pub card_b: Option<PathBuf>,

    /// Device serial number.
    #[arg(long)]
    pub serial: Option<String>,

    /// Use an empty in-memory device of this many bytes instead of mounted paths.
    #[arg(long, conflicts_with_all = ["folder", "main"])]
    pub memory: Option<u64>,
}

/// Parse a USB id such as `0x1949` or `1949`.
pub fn parse_hex_id(s: &str) -> std::result::Result<u16, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid USB id {s}: {e}"))
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Session behaviour.
    #[serde(default)]
    pub settings: SessionSettings,

    /// Cover thumbnail options.
    #[serde(default)]
    pub covers: CoverConfig,

    /// User-defined devices, matched after the built-in ones.
    #[serde(default)]
    pub devices: Vec<UserDeviceConfig>,

    /// Named folders usable as devices.
    #[serde(default)]
    pub folders: Vec<FolderConfig>,
}

/// Cover configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverConfig {
    /// JPEG quality for cover sidecars and cached thumbnails (1-100).
    #[serde(default = "default_quality")]
    pub jpeg_quality: u8,
}

impl Default for CoverConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_quality(),
        }
    }
}

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}

/// A device model defined in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDeviceConfig {
    /// Driver name.
    pub name: String,

    /// PnP vendor string.
    #[serde(default)]
    pub vendor_name: String,

    /// USB vendor ids.
    pub vendor_ids: Vec<u16>,

    /// USB product ids.
    pub product_ids: Vec<u16>,

    /// Accepted release numbers (empty accepts any).
    #[serde(default)]
    pub bcd: Vec<u16>,

    /// Supported formats in order of preference.
    pub formats: Vec<String>,

    /// Book directory on main memory.
    #[serde(default)]
    pub main_dir: String,

    /// Book directory on the first card.
    #[serde(default)]
    pub card_a_dir: String,

    /// Book directory on the second card.
    #[serde(default)]
    pub card_b_dir: String,

    /// Sidecar suffixes deleted with each book.
    #[serde(default)]
    pub delete_extensions: Vec<String>,

    /// Whether books may be stored in subdirectories.
    #[serde(default = "default_subdirectories")]
    pub subdirectories: bool,

    /// Cover thumbnail height.
    #[serde(default = "default_thumbnail_height")]
    pub thumbnail_height: u32,

    /// Per-model behaviour to borrow from a built-in driver.
    #[serde(default)]
    pub hooks: DriverHooks,
}

fn default_subdirectories() -> bool {
    true
}

fn default_thumbnail_height() -> u32 {
    DEFAULT_THUMBNAIL_HEIGHT
}

impl UserDeviceConfig {
    /// Build the driver this entry describes.
    pub fn to_driver(&self) -> Driver {
        let formats = self
            .formats
            .iter()
            .map(|f| f.trim_start_matches('.').to_lowercase())
            .collect();

        Driver {
            identity: DeviceIdentity {
                name: self.name.clone(),
                vendor_name: self.vendor_name.clone(),
                usb_ids: UsbId::expand(&self.vendor_ids, &self.product_ids, &self.bcd),
                main_volume_label: format!("{} Main Memory", self.name),
                card_volume_label: format!("{} Storage Card", self.name),
                ..Default::default()
            },
            capabilities: DeviceCapabilities {
                supported_formats: formats,
                supports_subdirectories: self.subdirectories,
                main_dir: self.main_dir.clone(),
                card_a_dir: self.card_a_dir.clone(),
                card_b_dir: self.card_b_dir.clone(),
                thumbnail_height: self.thumbnail_height,
                auxiliary_delete_extensions: self.delete_extensions.clone(),
                supports_cover_upload: self.hooks.writes_cover(),
                hooks: self.hooks,
                ..Default::default()
            },
        }
    }
}

/// A named folder device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderConfig {
    /// Name used on the command line.
    pub name: String,

    /// Host folder.
    pub path: PathBuf,
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DeviceError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| DeviceError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.covers.jpeg_quality) {
            return Err(DeviceError::Config(format!(
                "covers.jpeg_quality must be between 1 and 100, got {}",
                self.covers.jpeg_quality
            )));
        }
        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(DeviceError::Config("device without a name".into()));
            }
            if device.formats.is_empty() {
                return Err(DeviceError::Config(format!(
                    "device {} declares no formats",
                    device.name
                )));
            }
            if device.thumbnail_height == 0 {
                return Err(DeviceError::Config(format!(
                    "device {} needs a positive thumbnail_height",
                    device.name
                )));
            }
            if device.vendor_ids.is_empty() || device.product_ids.is_empty() {
                return Err(DeviceError::Config(format!(
                    "device {} needs vendor_ids and product_ids",
                    device.name
                )));
            }
        }
        Ok(())
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("ebook-device.toml"),
            dirs::config_dir()
                .map(|p| p.join("ebook-device").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/ebook-device/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Folder configured under `name`.
    pub fn folder(&self, name: &str) -> Option<&FolderConfig> {
        self.folders.iter().find(|f| f.name == name)
    }

    /// Registry over the built-in drivers followed by the configured ones.
    pub fn registry(&self) -> DeviceRegistry {
        let user = self.devices.iter().map(UserDeviceConfig::to_driver).collect();
        DeviceRegistry::builtin()
            .with_user_devices(user)
            .with_settings(self.settings.clone())
            .with_cover_renderer(Arc::new(ImageCoverRenderer {
                quality: self.covers.jpeg_quality,
            }))
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# ebook-device configuration

[settings]
# Read metadata from book files (otherwise only from file names)
read_metadata = true
# Upload into author/title folders on devices that allow it
use_subdirs = true
# Write the on-device metadata cache after every upload/delete
flush_on_mutation = true

[covers]
jpeg_quality = 90

# Extra devices, matched after the built-in drivers
# [[devices]]
# name = "My Reader"
# vendor_name = "ACME"
# vendor_ids = [0x1234]
# product_ids = [0x0001]
# formats = ["epub", "pdf"]
# main_dir = "Books"
# delete_extensions = [".thn"]
# hooks = "generic"

# Folders usable with --folder NAME
# [[folders]]
# name = "backup"
# path = "/mnt/nas/ebooks"
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config: Config = toml::from_str(&Config::generate_default()).unwrap();
        assert!(config.settings.read_metadata);
        assert_eq!(config.covers.jpeg_quality, 90);
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_user_device_to_driver() {
        let toml = r#"
            [settings]
            use_subdirs = false

            [[devices]]
            name = "My Reader"
            vendor_ids = [0x1234]
            product_ids = [1, 2]
            formats = [".EPUB", "pdf"]
            hooks = "cybook"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert!(!config.settings.use_subdirs);
        assert!(config.settings.flush_on_mutation);

        let driver = config.devices[0].to_driver();
        assert_eq!(driver.capabilities.supported_formats, vec!["epub", "pdf"]);
        assert_eq!(driver.identity.usb_ids.len(), 2);
        assert!(driver.capabilities.supports_cover_upload);

        let registry = config.registry();
        assert_eq!(registry.drivers().last().unwrap().name(), "My Reader");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config: Config = toml::from_str(
            r#"
            [[devices]]
            name = "Empty"
            vendor_ids = [1]
            product_ids = [1]
            formats = []
        "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(DeviceError::Config(_))));
    }

    #[test]
    fn test_zero_thumbnail_height_rejected() {
        let config: Config = toml::from_str(
            r#"
            [[devices]]
            name = "Flat"
            vendor_ids = [1]
            product_ids = [1]
            formats = ["epub"]
            thumbnail_height = 0
        "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(DeviceError::Config(_))));
    }

    #[test]
    fn test_parse_hex_id() {
        assert_eq!(parse_hex_id("0x1949"), Ok(0x1949));
        assert_eq!(parse_hex_id("1f85"), Ok(0x1f85));
        assert!(parse_hex_id("zz").is_err());
    }
}
