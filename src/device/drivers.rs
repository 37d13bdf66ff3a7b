//! Built-in driver table.

use super::capabilities::DeviceCapabilities;
use super::hooks::DriverHooks;
use super::identity::{DeviceIdentity, LabelPattern, UnixStrings, UsbId};

/// Name of the folder pseudo-device.
pub const FOLDER_DRIVER_NAME: &str = "Folder Device Interface";

/// A device model: how to recognise it and how it lays out books.
#[derive(Debug, Clone)]
pub struct Driver {
    /// Matching descriptor.
    pub identity: DeviceIdentity,
    /// Layout and format rules.
    pub capabilities: DeviceCapabilities,
}

impl Driver {
    /// Driver name.
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Whether this is the folder pseudo-device, which never matches hardware.
    pub fn is_folder(&self) -> bool {
        self.capabilities.hooks == DriverHooks::Folder
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn regex(pattern: &str) -> Option<LabelPattern> {
    match LabelPattern::regex(pattern) {
        Ok(p) => Some(p),
        Err(e) => {
            tracing::error!(pattern, error = %e, "Invalid built-in volume pattern");
            None
        }
    }
}

fn kindle() -> Driver {
    Driver {
        identity: DeviceIdentity {
            name: "Kindle Device Interface".into(),
            vendor_name: "KINDLE".into(),
            usb_ids: UsbId::expand(&[0x1949], &[0x0001], &[0x399]),
            windows_main_mem: Some(LabelPattern::any(&["INTERNAL_STORAGE"])),
            windows_card_a_mem: Some(LabelPattern::any(&["CARD_STORAGE"])),
            osx_main_mem: Some(LabelPattern::any(&["Kindle Internal Storage Media"])),
            osx_card_a_mem: Some(LabelPattern::any(&["Kindle Card Storage Media"])),
            main_volume_label: "Kindle Main Memory".into(),
            card_volume_label: "Kindle Storage Card".into(),
            ..Default::default()
        },
        capabilities: DeviceCapabilities {
            supported_formats: strings(&["azw", "mobi", "prc", "azw1", "tpz", "txt"]),
            supports_subdirectories: true,
            main_dir: "documents".into(),
            card_a_dir: "documents".into(),
            auxiliary_delete_extensions: strings(&[".mbp", ".tan", ".pdr"]),
            hooks: DriverHooks::Kindle,
            ..Default::default()
        },
    }
}

fn kindle2() -> Driver {
    let mut driver = kindle();
    driver.identity.name = "Kindle 2/3 Device Interface".into();
    driver.identity.usb_ids = UsbId::expand(&[0x1949], &[0x0002, 0x0004], &[0x0100]);
    driver.capabilities.supported_formats.push("pdf".into());
    driver
        .capabilities
        .auxiliary_delete_extensions
        .push(".apnx".into());
    driver
}

fn kindle_dx() -> Driver {
    let mut driver = kindle2();
    driver.identity.name = "Kindle DX Device Interface".into();
    driver.identity.usb_ids = UsbId::expand(&[0x1949], &[0x0003], &[0x0100]);
    driver
}

fn nook() -> Driver {
    Driver {
        identity: DeviceIdentity {
            name: "Nook Device Interface".into(),
            vendor_name: "B&N".into(),
            usb_ids: UsbId::expand(&[0x2080], &[0x001], &[0x322]),
            windows_main_mem: Some(LabelPattern::any(&["NOOK"])),
            windows_card_a_mem: Some(LabelPattern::any(&["NOOK"])),
            osx_main_mem: Some(LabelPattern::any(&["B&N nook Media"])),
            osx_card_a_mem: Some(LabelPattern::any(&["B&N nook Media"])),
            main_volume_label: "Nook Main Memory".into(),
            card_volume_label: "Nook Storage Card".into(),
            ..Default::default()
        },
        capabilities: DeviceCapabilities {
            supported_formats: strings(&["epub", "pdb", "pdf"]),
            supports_subdirectories: true,
            main_dir: "my documents".into(),
            thumbnail_height: 144,
            auxiliary_delete_extensions: strings(&[".jpg"]),
            supports_cover_upload: true,
            hooks: DriverHooks::Nook,
            ..Default::default()
        },
    }
}

fn cybook() -> Driver {
    Driver {
        identity: DeviceIdentity {
            name: "Cybook Gen 3 / Opus Device Interface".into(),
            vendor_name: "BOOKEEN".into(),
            usb_ids: UsbId::expand(&[0x0bda, 0x3034], &[0x0703, 0x1795], &[0x110, 0x132]),
            windows_main_mem: regex(r"CYBOOK_(OPUS|GEN3)__-FD"),
            windows_card_a_mem: regex(r"CYBOOK_(OPUS|GEN3)__-SD"),
            osx_main_mem: regex(r"/Cybook"),
            unix_strings: Some(UnixStrings {
                manufacturer: "Bookeen".into(),
                products: strings(&["Cybook Gen3", "Cybook Opus"]),
            }),
            main_volume_label: "Cybook Main Memory".into(),
            card_volume_label: "Cybook Storage Card".into(),
            ..Default::default()
        },
        capabilities: DeviceCapabilities {
            supported_formats: strings(&["epub", "mobi", "prc", "html", "pdf", "rtf", "txt"]),
            supports_subdirectories: true,
            main_dir: "eBooks".into(),
            card_a_dir: "eBooks".into(),
            thumbnail_height: 144,
            auxiliary_delete_extensions: strings(&[".mbp", ".dat", ".bin", "_6090.t2b", ".thn"]),
            supports_cover_upload: true,
            hooks: DriverHooks::Cybook,
            ..Default::default()
        },
    }
}

fn eb600() -> Driver {
    Driver {
        identity: DeviceIdentity {
            name: "Netronix EB600 Device Interface".into(),
            vendor_name: "NETRONIX".into(),
            usb_ids: UsbId::expand(&[0x1f85], &[0x1688], &[0x110]),
            windows_main_mem: Some(LabelPattern::any(&["EBOOK"])),
            windows_card_a_mem: Some(LabelPattern::any(&["EBOOK"])),
            osx_main_mem: Some(LabelPattern::any(&["EB600 Internal Storage Media"])),
            osx_card_a_mem: Some(LabelPattern::any(&["EB600 Card Storage Media"])),
            main_volume_label: "EB600 Main Memory".into(),
            card_volume_label: "EB600 Storage Card".into(),
            ..Default::default()
        },
        capabilities: DeviceCapabilities {
            supported_formats: strings(&[
                "epub", "mobi", "prc", "chm", "djvu", "html", "rtf", "txt", "pdf",
            ]),
            drm_restricted_formats: strings(&["prc", "mobi", "html", "pdf", "txt"]),
            supports_subdirectories: true,
            hooks: DriverHooks::Eb600,
            ..Default::default()
        },
    }
}

/// Shares the EB600's USB ids, so USB detection always picks the EB600 first.
fn cool_er() -> Driver {
    let mut driver = eb600();
    driver.identity.name = "Cool-er Device Interface".into();
    driver.identity.vendor_name = "COOL-ER".into();
    driver.identity.windows_main_mem = Some(LabelPattern::any(&["EREADER"]));
    driver.capabilities.supported_formats = strings(&["epub", "mobi", "prc", "pdf", "txt"]);
    driver.capabilities.main_dir = "my docs".into();
    driver
}

fn irex_dr1000() -> Driver {
    Driver {
        identity: DeviceIdentity {
            name: "IRex Digital Reader 1000 Device Interface".into(),
            vendor_name: "IREX".into(),
            usb_ids: UsbId::expand(&[0x1e6b], &[0x001], &[0x322]),
            windows_main_mem: Some(LabelPattern::any(&["DR1000"])),
            osx_main_mem: Some(LabelPattern::any(&["iRex DR1000 Media"])),
            main_volume_label: "IRex Digital Reader 1000 Main Memory".into(),
            ..Default::default()
        },
        capabilities: DeviceCapabilities {
            supported_formats: strings(&["epub", "mobi", "prc", "html", "pdf", "txt"]),
            supports_subdirectories: true,
            main_dir: "ebooks".into(),
            auxiliary_delete_extensions: strings(&[".mbp"]),
            ..Default::default()
        },
    }
}

fn iriver_story() -> Driver {
    Driver {
        identity: DeviceIdentity {
            name: "Iriver Story Device Interface".into(),
            vendor_name: "IRIVER".into(),
            usb_ids: UsbId::expand(&[0x1006], &[0x4023, 0x4024, 0x4025], &[0x0323]),
            windows_main_mem: Some(LabelPattern::any(&["STORY", "STORY_EB05", "STORY_WI-FI"])),
            windows_card_a_mem: Some(LabelPattern::any(&["STORY", "STORY_SD"])),
            main_volume_label: "Story Main Memory".into(),
            card_volume_label: "Story Storage Card".into(),
            ..Default::default()
        },
        capabilities: DeviceCapabilities {
            supported_formats: strings(&["epub", "fb2", "pdf", "djvu", "txt"]),
            supports_subdirectories: true,
            main_dir: "Book".into(),
            ..Default::default()
        },
    }
}

fn samsung_sne() -> Driver {
    Driver {
        identity: DeviceIdentity {
            name: "Samsung SNE Device Interface".into(),
            usb_ids: UsbId::expand(&[0x04e8], &[0x2051], &[0x0323]),
            main_volume_label: "SNE Main Memory".into(),
            card_volume_label: "SNE Storage Card".into(),
            ..Default::default()
        },
        capabilities: DeviceCapabilities {
            supported_formats: strings(&["epub", "txt"]),
            supports_subdirectories: true,
            main_dir: "Book".into(),
            ..Default::default()
        },
    }
}

/// The folder pseudo-device. It has no USB ids and is only ever opened explicitly.
pub fn folder_driver() -> Driver {
    Driver {
        identity: DeviceIdentity {
            name: FOLDER_DRIVER_NAME.into(),
            main_volume_label: "Folder".into(),
            ..Default::default()
        },
        capabilities: DeviceCapabilities {
            supported_formats: strings(&[
                "epub", "fb2", "mobi", "lrf", "tcr", "pmlz", "lit", "rtf", "rb", "pdf", "oeb",
                "txt", "pdb",
            ]),
            supports_subdirectories: true,
            can_set_metadata: true,
            hooks: DriverHooks::Folder,
            ..Default::default()
        },
    }
}

/// Built-in hardware drivers in registration order.
pub fn builtin_drivers() -> Vec<Driver> {
    vec![
        kindle(),
        kindle2(),
        kindle_dx(),
        nook(),
        cybook(),
        eb600(),
        cool_er(),
        irex_dr1000(),
        iriver_story(),
        samsung_sne(),
    ]
}
