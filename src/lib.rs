//! ebook-device: storage and file layout for e-book reader devices.
//!
//! This crate matches USB mass-storage and protocol-based e-readers to
//! drivers, maps their mounted volumes to storage slots and moves books on
//! and off them, keeping an on-device metadata cache in step.
//!
//! # Features
//!
//! - Built-in drivers for Kindle, Nook, Cybook, EB600, iRex, iRiver and Samsung readers
//! - Main memory plus up to two storage cards per device
//! - Upload paths derived from book metadata, bounded for FAT filesystems
//! - Free-space checks and atomic writes on upload
//! - Sidecar cleanup on delete
//! - Persistent metadata cache with cover thumbnails
//! - Folder pseudo-device for plain host directories

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Book metadata and device records.
pub mod book;
/// Configuration and CLI.
pub mod config;
/// Cover thumbnails and sidecar images.
pub mod cover;
/// Drivers, slots and sessions.
pub mod device;
/// Error types.
pub mod error;
/// Book format metadata readers.
pub mod formats;
/// Slot storage backends.
pub mod fs;

#[cfg(test)]
mod tests;

pub use book::{BookMetadata, BookRecord};
pub use config::{Cli, Command, Config};
pub use device::{DeviceRegistry, DeviceSession, Driver, SlotId, StorageSlot};
pub use error::{DeviceError, Result};
