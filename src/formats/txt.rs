use crate::book::BookMetadata;
use crate::error::FormatError;
use crate::formats::{MetadataReader, decode_text, split_authors};
use regex::Regex;
use std::sync::LazyLock;

static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[ ]*(?P<title>.+?)[ ]*(?:\n{3}|(?:\r\n){3}|\r{3})[ ]*(?P<author>.+?)[ ]*(?:\n|\r\n|\r)$")
        .expect("valid regex")
});

/// Reader for plain text: a title line, two blank lines, then an author line.
pub struct TxtReader;

impl MetadataReader for TxtReader {
    fn read_metadata(&self, data: &[u8], file_name: &str) -> Result<BookMetadata, FormatError> {
        let text = decode_text(data);
        let head: String = text.split_inclusive('\n').take(4).collect();

        let mut mi = BookMetadata::from_file_name(file_name);
        if let Some(caps) = HEADER.captures(&head) {
            mi.title = caps["title"].trim().to_string();
            mi.authors = split_authors(&caps["author"]);
        }
        Ok(mi)
    }
}
