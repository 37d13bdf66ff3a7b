//! Per-slot metadata cache persisted at the slot root.
//!
//! The cache maps slot-relative paths to the metadata last derived for that
//! file, keyed by a [`FileSignature`]. It is only trusted for display: a hit
//! requires the live file's size and mtime to match the stored ones.
//!
//! On disk it is a JSON object:
//!
//! ```json
//! { "version": 1, "books": { "documents/a.mobi": { "size": 1, "mtime": 2, "title": "A" } } }
//! ```
//!
//! Keys this crate does not know, at the top level or inside an entry, are
//! kept and written back.

use crate::book::BookMetadata;
use crate::error::Result;
use crate::fs::DeviceFilesystem;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Current cache file version.
pub const CACHE_VERSION: u32 = 1;

/// Size and modification time of a file, used to validate cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileSignature {
    /// Size in bytes.
    pub size: u64,
    /// Modification time (unix seconds).
    pub mtime: i64,
}

impl FileSignature {
    /// Creates a signature.
    pub fn new(size: u64, mtime: i64) -> Self {
        Self { size, mtime }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CacheEntry {
    size: u64,
    mtime: i64,
    title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    author_sort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    isbn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    published: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    series: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    series_index: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rights: Option<String>,
    /// Base64 encoded cover bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl CacheEntry {
    fn new(sig: FileSignature, mi: &BookMetadata, extra: Map<String, Value>) -> Self {
        Self {
            size: sig.size,
            mtime: sig.mtime,
            title: mi.title.clone(),
            authors: mi.authors.clone(),
            author_sort: mi.author_sort.clone(),
            publisher: mi.publisher.clone(),
            isbn: mi.isbn.clone(),
            description: mi.description.clone(),
            language: mi.language.clone(),
            published: mi.published.clone(),
            series: mi.series.clone(),
            series_index: mi.series_index,
            tags: mi.tags.clone(),
            rights: mi.rights.clone(),
            thumbnail: mi.cover.as_ref().map(|c| STANDARD.encode(c)),
            timestamp: mi.timestamp,
            extra,
        }
    }

    fn signature(&self) -> FileSignature {
        FileSignature::new(self.size, self.mtime)
    }

    fn metadata(&self) -> BookMetadata {
        let cover = self
            .thumbnail
            .as_deref()
            .and_then(|t| STANDARD.decode(t).ok());
        BookMetadata {
            title: self.title.clone(),
            authors: self.authors.clone(),
            author_sort: self.author_sort.clone(),
            publisher: self.publisher.clone(),
            isbn: self.isbn.clone(),
            description: self.description.clone(),
            language: self.language.clone(),
            published: self.published.clone(),
            series: self.series.clone(),
            series_index: self.series_index,
            tags: self.tags.clone(),
            rights: self.rights.clone(),
            cover,
            timestamp: self.timestamp,
        }
    }
}

fn default_version() -> u32 {
    CACHE_VERSION
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    books: BTreeMap<String, CacheEntry>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// In-memory view of one slot's cache file.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: BTreeMap<String, CacheEntry>,
    extra: Map<String, Value>,
    dirty: bool,
}

impl MetadataCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the cache file `name` from the slot root.
    ///
    /// A missing or unreadable file yields an empty cache.
    pub fn load(fs: &dyn DeviceFilesystem, name: &str) -> Self {
        let data = match fs.read(name) {
            Ok(data) => data,
            Err(e) if e.is_not_found() => {
                tracing::debug!(slot = %fs.describe(), "No metadata cache on slot");
                return Self::new();
            }
            Err(e) => {
                tracing::warn!(slot = %fs.describe(), error = %e, "Cannot read metadata cache, starting empty");
                return Self::new();
            }
        };

        match serde_json::from_slice::<CacheFile>(&data) {
            Ok(file) => {
                tracing::debug!(slot = %fs.describe(), entries = file.books.len(), "Loaded metadata cache");
                Self {
                    entries: file.books,
                    extra: file.extra,
                    dirty: false,
                }
            }
            Err(e) => {
                tracing::warn!(slot = %fs.describe(), error = %e, "Corrupt metadata cache, starting empty");
                Self::new()
            }
        }
    }

    /// Cached metadata for `path` if its signature still matches.
    pub fn get(&self, path: &str, sig: FileSignature) -> Option<BookMetadata> {
        self.entries
            .get(path)
            .filter(|e| e.signature() == sig)
            .map(CacheEntry::metadata)
    }

    /// Inserts or replaces the entry for `path`. Unknown keys of a replaced entry are kept.
    pub fn put(&mut self, path: &str, sig: FileSignature, metadata: &BookMetadata) {
        let extra = self
            .entries
            .remove(path)
            .map(|e| e.extra)
            .unwrap_or_default();
        self.entries
            .insert(path.to_string(), CacheEntry::new(sig, metadata, extra));
        self.dirty = true;
    }

    /// Removes the entry for `path`, returning whether it existed.
    pub fn remove(&mut self, path: &str) -> bool {
        let removed = self.entries.remove(path).is_some();
        self.dirty |= removed;
        removed
    }

    /// Keeps only entries whose path satisfies `keep`. Returns how many were dropped.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&str) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|path, _| keep(path));
        let dropped = before - self.entries.len();
        self.dirty |= dropped > 0;
        dropped
    }

    /// Writes the cache file if anything changed since the last load or flush.
    ///
    /// Returns whether a write happened.
    pub fn flush(&mut self, fs: &dyn DeviceFilesystem, name: &str) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }

        let file = CacheFile {
            version: CACHE_VERSION,
            books: self.entries.clone(),
            extra: self.extra.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        fs.write_atomic(name, &json)?;
        self.dirty = false;

        tracing::debug!(slot = %fs.describe(), entries = self.entries.len(), "Flushed metadata cache");
        Ok(true)
    }

    /// Whether `path` has an entry (with any signature).
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether there are unflushed changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Cached paths in order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
