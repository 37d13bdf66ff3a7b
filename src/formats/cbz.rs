//! CBZ (Comic Book ZIP) metadata reader.

use crate::book::BookMetadata;
use crate::error::FormatError;
use crate::formats::{MetadataReader, split_authors};
use roxmltree::Document;
use std::io::{Cursor, Read};
use zip::ZipArchive;

/// Reader for CBZ files: `ComicInfo.xml` when present, first page as cover.
pub struct CbzReader;

impl CbzReader {
    /// Check if a filename is an image.
    fn is_image_file(name: &str) -> bool {
        let lower = name.to_lowercase();
        lower.ends_with(".jpg")
            || lower.ends_with(".jpeg")
            || lower.ends_with(".png")
            || lower.ends_with(".gif")
            || lower.ends_with(".webp")
    }

    fn apply_comic_info(xml: &str, mi: &mut BookMetadata) -> Result<(), FormatError> {
        let doc = Document::parse(xml)?;
        for node in doc.descendants().filter(|n| n.is_element()) {
            let Some(text) = node.text().map(str::trim).filter(|t| !t.is_empty()) else {
                continue;
            };
            match node.tag_name().name() {
                "Title" => mi.title = text.to_string(),
                "Series" => mi.series = Some(text.to_string()),
                "Number" => mi.series_index = text.parse().ok(),
                "Writer" => mi.authors = split_authors(text),
                "Publisher" => mi.publisher = Some(text.to_string()),
                "Summary" => mi.description = Some(text.to_string()),
                "LanguageISO" => mi.language = Some(text.to_string()),
                "Genre" => mi.tags = split_authors(text),
                _ => {}
            }
        }
        Ok(())
    }
}

impl MetadataReader for CbzReader {
    fn read_metadata(&self, data: &[u8], file_name: &str) -> Result<BookMetadata, FormatError> {
        let mut archive = ZipArchive::new(Cursor::new(data))?;
        let mut mi = BookMetadata::from_file_name(file_name);

        let comic_info = archive
            .file_names()
            .find(|n| n.eq_ignore_ascii_case("ComicInfo.xml"))
            .map(String::from);
        if let Some(name) = comic_info {
            let mut xml = String::new();
            archive.by_name(&name)?.read_to_string(&mut xml)?;
            Self::apply_comic_info(&xml, &mut mi)?;
        }

        let mut images: Vec<String> = archive
            .file_names()
            .filter(|name| Self::is_image_file(name))
            .filter(|name| !name.contains("__MACOSX"))
            .map(String::from)
            .collect();
        images.sort();

        if let Some(first) = images.first() {
            let mut cover = Vec::new();
            archive.by_name(first)?.read_to_end(&mut cover)?;
            mi.cover = Some(cover);
        }

        Ok(mi)
    }
}
