mod cbz;
mod epub;
mod html;
mod pdf;
mod pml;
mod txt;

pub use cbz::CbzReader;
pub use epub::EpubReader;
pub use html::HtmlReader;
pub use pdf::PdfReader;
pub use pml::PmlReader;
pub use txt::TxtReader;

use crate::book::BookMetadata;
use crate::error::FormatError;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

/// Trait for format-specific metadata readers.
pub trait MetadataReader: Send + Sync {
    /// Extract metadata from the raw bytes of a book file.
    fn read_metadata(&self, data: &[u8], file_name: &str)
    -> Result<BookMetadata, FormatError>;
}

/// Maps lowercase extensions to metadata readers.
#[derive(Clone, Default)]
pub struct ReaderRegistry {
    readers: HashMap<String, Arc<dyn MetadataReader>>,
}

impl ReaderRegistry {
    /// Registry with no readers; every lookup falls back to the file name.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry populated with the built-in readers.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(&["epub"], Arc::new(EpubReader));
        registry.register(&["pdf"], Arc::new(PdfReader));
        registry.register(&["cbz"], Arc::new(CbzReader));
        registry.register(&["html", "htm", "xhtml"], Arc::new(HtmlReader));
        registry.register(&["txt"], Arc::new(TxtReader));
        registry.register(&["pml", "pmlz"], Arc::new(PmlReader));
        registry
    }

    /// Register a reader for one or more extensions, replacing earlier ones.
    pub fn register(&mut self, extensions: &[&str], reader: Arc<dyn MetadataReader>) {
        for ext in extensions {
            self.readers.insert(ext.to_lowercase(), reader.clone());
        }
    }

    /// Get the reader for an extension.
    pub fn get(&self, ext: &str) -> Option<&Arc<dyn MetadataReader>> {
        self.readers.get(&ext.to_lowercase())
    }
}

static FILENAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<title>[ \S]+?)[ _]-[ _](?P<author>[ \S]+?)_+\d+").expect("valid regex")
});

/// Guess metadata from a file name such as `Title - Author_123.epub`.
pub fn metadata_from_filename(file_name: &str) -> BookMetadata {
    let mut mi = BookMetadata::from_file_name(file_name);
    if let Some(caps) = FILENAME_PATTERN.captures(file_name) {
        mi.title = caps["title"].replace('_', " ").trim().to_string();
        let author = caps["author"].replace('_', " ");
        mi.authors = split_authors(&author);
    }
    mi
}

/// Split an author string on `,`, `;` and `&`.
pub(crate) fn split_authors(raw: &str) -> Vec<String> {
    raw.split([',', ';', '&'])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Decode bytes as UTF-8, falling back to Latin-1.
pub(crate) fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.trim_start_matches('\u{feff}').to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_from_filename() {
        let mi = metadata_from_filename("The Hobbit - J. R. R. Tolkien_1234.epub");
        assert_eq!(mi.title, "The Hobbit");
        assert_eq!(mi.authors, vec!["J. R. R. Tolkien".to_string()]);

        let plain = metadata_from_filename("Dune.mobi");
        assert_eq!(plain.title, "Dune");
        assert!(plain.authors.is_empty());
    }

    #[test]
    fn test_builtin_registry_lookup() {
        let registry = ReaderRegistry::builtin();
        assert!(registry.get("EPUB").is_some());
        assert!(registry.get("pmlz").is_some());
        assert!(registry.get("azw").is_none());
    }
}
