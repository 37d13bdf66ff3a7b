use crate::device::SlotId;
use thiserror::Error;

/// Main error type for device operations.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// A mandatory slot is missing or not mounted.
    #[error("Device not ready: {0}")]
    NotReady(String),

    /// Another session is already open for this physical device.
    #[error("Device busy: {0} already has an open session")]
    Busy(String),

    /// The session is not open (never opened, or already ejected).
    #[error("Device is not connected")]
    NotConnected,

    /// The requested storage slot has no mounted root.
    #[error("Storage slot {0} is not available")]
    SlotUnavailable(SlotId),

    /// The device cannot store this format.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Not enough free space on the target slot.
    #[error("Insufficient space: {needed} bytes needed, {available} bytes available")]
    InsufficientSpace {
        /// Bytes required by the upload.
        needed: u64,
        /// Free bytes reported by the slot.
        available: u64,
    },

    /// A file already occupies the destination path.
    #[error("Path conflict: {0} already exists on the device")]
    PathConflict(String),

    /// Removing a book's primary file failed.
    #[error("Failed to delete {path}: {source}")]
    Delete {
        /// Device relative path of the book.
        path: String,
        /// Underlying error.
        #[source]
        source: Box<DeviceError>,
    },

    /// The operation was cancelled before it started.
    #[error("Operation cancelled")]
    Cancelled,

    /// A device path does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A device path escapes its slot root or is otherwise malformed.
    #[error("Invalid device path: {0}")]
    InvalidPath(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata reader or cover transcoder error.
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Cache (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Protocol transport error.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl DeviceError {
    /// Whether this error means "the path does not exist".
    pub fn is_not_found(&self) -> bool {
        match self {
            DeviceError::NotFound(_) => true,
            DeviceError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Error type for format metadata readers and the cover transcoder.
#[derive(Error, Debug)]
pub enum FormatError {
    /// Invalid format error.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP archive error.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// PDF processing error.
    #[error("PDF error: {0}")]
    Pdf(String),

    /// XML parsing error.
    #[error("XML parsing error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// Image processing error.
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),
}

/// Result type alias for device operations.
pub type Result<T> = std::result::Result<T, DeviceError>;
