//! Book metadata and on-device book records.

use crate::device::SlotId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// Title used when nothing better is known.
pub const UNKNOWN: &str = "Unknown";

/// Descriptive metadata for a book, as read from the file or supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookMetadata {
    /// Book title.
    pub title: String,

    /// Authors (may be empty).
    pub authors: Vec<String>,

    /// Author sort key.
    pub author_sort: Option<String>,

    /// Publisher name.
    pub publisher: Option<String>,

    /// ISBN or other identifier.
    pub isbn: Option<String>,

    /// Book description or summary.
    pub description: Option<String>,

    /// Language code (e.g., "en", "fr").
    pub language: Option<String>,

    /// Publication date.
    pub published: Option<String>,

    /// Series name.
    pub series: Option<String>,

    /// Position in series.
    pub series_index: Option<f32>,

    /// Subject/genre tags.
    pub tags: Vec<String>,

    /// Copyright statement.
    pub rights: Option<String>,

    /// Raw cover image bytes.
    #[serde(skip)]
    pub cover: Option<Vec<u8>>,

    /// When the book was produced (news downloads use this for their folder).
    pub timestamp: Option<DateTime<Utc>>,
}

impl BookMetadata {
    /// Create metadata with just a title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Metadata derived from nothing but a file name: the stem becomes the title.
    pub fn from_file_name(file_name: &str) -> Self {
        let title = Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN);
        Self::new(title)
    }

    /// Get display name for authors.
    pub fn authors_display(&self) -> String {
        if self.authors.is_empty() {
            UNKNOWN.to_string()
        } else {
            self.authors.join(" & ")
        }
    }

    /// Whether the title is still the placeholder.
    pub fn has_unknown_title(&self) -> bool {
        self.title.is_empty() || self.title == UNKNOWN
    }
}

impl Default for BookMetadata {
    fn default() -> Self {
        Self {
            title: UNKNOWN.to_string(),
            authors: Vec::new(),
            author_sort: None,
            publisher: None,
            isbn: None,
            description: None,
            language: None,
            published: None,
            series: None,
            series_index: None,
            tags: Vec::new(),
            rights: None,
            cover: None,
            timestamp: None,
        }
    }
}

/// One book stored on a device slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookRecord {
    /// Path relative to the slot root, `/` separated.
    pub relative_path: String,

    /// Slot holding the file.
    pub slot: SlotId,

    /// Lowercase file extension.
    pub format_extension: String,

    /// File size in bytes.
    pub size_bytes: u64,

    /// Modification time (unix seconds).
    pub mtime: i64,

    /// Cached or freshly read metadata.
    pub metadata: BookMetadata,
}

impl BookRecord {
    /// Get the filename of the book.
    pub fn filename(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }

    /// MIME type for the book's format, if known.
    pub fn mime_type(&self) -> Option<&'static str> {
        mime_type(&self.format_extension)
    }
}

/// Lowercase extension of a path, without the dot.
pub fn extension_of(path: &str) -> Option<String> {
    let name = path.rsplit(['/', '\\']).next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Get the MIME type for an e-book extension.
pub fn mime_type(ext: &str) -> Option<&'static str> {
    let mime = match ext.to_lowercase().as_str() {
        "epub" => "application/epub+zip",
        "pdf" => "application/pdf",
        "cbz" => "application/vnd.comicbook+zip",
        "cbr" => "application/vnd.comicbook-rar",
        "mobi" | "prc" => "application/x-mobipocket-ebook",
        "azw" | "azw1" | "azw3" => "application/vnd.amazon.ebook",
        "tpz" => "application/x-topaz-ebook",
        "fb2" => "application/x-fictionbook+xml",
        "lit" => "application/x-ms-reader",
        "lrf" => "application/x-sony-bbeb",
        "rtf" => "application/rtf",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "pdb" | "pml" | "pmlz" => "application/vnd.palm",
        "djvu" => "image/vnd.djvu",
        "chm" => "application/vnd.ms-htmlhelp",
        _ => return None,
    };
    Some(mime)
}
