use crate::book::BookMetadata;
use crate::error::FormatError;
use crate::formats::{MetadataReader, split_authors};
use lopdf::Document;

/// Reader for PDF files.
pub struct PdfReader;

impl PdfReader {
    /// Extract text content from a PDF info dictionary value.
    fn extract_text(obj: &lopdf::Object) -> Option<String> {
        match obj {
            lopdf::Object::String(bytes, _) => {
                // Try UTF-16BE first (starts with BOM)
                if bytes.starts_with(&[0xFE, 0xFF]) {
                    let utf16: Vec<u16> = bytes[2..]
                        .chunks(2)
                        .map(|chunk| {
                            u16::from_be_bytes([chunk[0], chunk.get(1).copied().unwrap_or(0)])
                        })
                        .collect();
                    String::from_utf16(&utf16).ok()
                } else {
                    Some(crate::formats::decode_text(bytes))
                }
            }
            lopdf::Object::Name(name) => String::from_utf8(name.clone()).ok(),
            _ => None,
        }
    }

    fn info_text(info: &lopdf::Dictionary, key: &[u8]) -> Option<String> {
        let text = Self::extract_text(info.get(key).ok()?)?;
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

impl MetadataReader for PdfReader {
    fn read_metadata(&self, data: &[u8], file_name: &str) -> Result<BookMetadata, FormatError> {
        let doc = Document::load_mem(data).map_err(|e| FormatError::Pdf(e.to_string()))?;
        let mut mi = BookMetadata::from_file_name(file_name);

        if let Ok(info_dict) = doc.trailer.get(b"Info")
            && let Ok(info_ref) = info_dict.as_reference()
            && let Ok(info) = doc.get_dictionary(info_ref)
        {
            if let Some(title) = Self::info_text(info, b"Title") {
                mi.title = title;
            }
            if let Some(author) = Self::info_text(info, b"Author") {
                mi.authors = split_authors(&author);
            }
            mi.description = Self::info_text(info, b"Subject");
            if let Some(keywords) = Self::info_text(info, b"Keywords") {
                mi.tags = keywords
                    .split([',', ';'])
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
        }

        Ok(mi)
    }
}
