//! PML / PMLZ metadata reader.

use crate::book::BookMetadata;
use crate::error::FormatError;
use crate::formats::{MetadataReader, decode_text};
use regex::Regex;
use std::io::{Cursor, Read};
use std::sync::LazyLock;
use zip::ZipArchive;

static COMMENT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\\v.*?\\v").expect("valid regex"));

fn field(name: &str) -> Regex {
    Regex::new(&format!(r#"{name}="(.*?)""#)).expect("valid regex")
}

static TITLE: LazyLock<Regex> = LazyLock::new(|| field("TITLE"));
static AUTHOR: LazyLock<Regex> = LazyLock::new(|| field("AUTHOR"));
static PUBLISHER: LazyLock<Regex> = LazyLock::new(|| field("PUBLISHER"));
static COPYRIGHT: LazyLock<Regex> = LazyLock::new(|| field("COPYRIGHT"));
static ISBN: LazyLock<Regex> = LazyLock::new(|| field("ISBN"));

/// Reader for Palm Markup Language files and zipped PML bundles.
pub struct PmlReader;

impl PmlReader {
    /// Concatenate every `.pml` member of a PMLZ archive and pick up its cover.
    fn unpack_pmlz(data: &[u8], stem: &str) -> Result<(String, Option<Vec<u8>>), FormatError> {
        let mut archive = ZipArchive::new(Cursor::new(data))?;

        let mut names: Vec<String> = archive
            .file_names()
            .filter(|n| n.to_lowercase().ends_with(".pml"))
            .map(String::from)
            .collect();
        names.sort();

        let mut pml = String::new();
        for name in &names {
            let mut raw = Vec::new();
            archive.by_name(name)?.read_to_end(&mut raw)?;
            pml.push_str(&decode_text(&raw));
        }

        let candidates = [
            "cover.png".to_string(),
            format!("{stem}_img/cover.png"),
            "images/cover.png".to_string(),
        ];
        let mut cover = None;
        for candidate in &candidates {
            if let Ok(mut entry) = archive.by_name(candidate) {
                let mut raw = Vec::new();
                entry.read_to_end(&mut raw)?;
                cover = Some(raw);
                break;
            }
        }

        Ok((pml, cover))
    }

    fn apply_comments(pml: &str, mi: &mut BookMetadata) {
        let first = |re: &Regex, block: &str| {
            re.captures(block).map(|c| c[1].trim().to_string())
        };

        for block in COMMENT_BLOCK.find_iter(pml).map(|m| m.as_str()) {
            if let Some(title) = first(&TITLE, block) {
                mi.title = title;
            }
            if let Some(author) = first(&AUTHOR, block) {
                mi.authors.push(author);
            }
            if let Some(publisher) = first(&PUBLISHER, block) {
                mi.publisher = Some(publisher);
            }
            if let Some(rights) = first(&COPYRIGHT, block) {
                mi.rights = Some(rights);
            }
            if let Some(isbn) = first(&ISBN, block) {
                mi.isbn = Some(isbn);
            }
        }
    }
}

impl MetadataReader for PmlReader {
    fn read_metadata(&self, data: &[u8], file_name: &str) -> Result<BookMetadata, FormatError> {
        let mut mi = BookMetadata::from_file_name(file_name);

        let pml = if file_name.to_lowercase().ends_with(".pmlz") {
            let stem = mi.title.clone();
            let (pml, cover) = Self::unpack_pmlz(data, &stem)?;
            mi.cover = cover;
            pml
        } else {
            decode_text(data)
        };

        Self::apply_comments(&pml, &mut mi);
        Ok(mi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comment_blocks() {
        let pml = br#"\vTITLE="The Time Machine" AUTHOR="H. G. Wells"\v
\vPUBLISHER="Heinemann" COPYRIGHT="Public domain" ISBN="123"\v
\pText body"#;
        let mi = PmlReader.read_metadata(pml, "time.pml").unwrap();
        assert_eq!(mi.title, "The Time Machine");
        assert_eq!(mi.authors, vec!["H. G. Wells".to_string()]);
        assert_eq!(mi.publisher.as_deref(), Some("Heinemann"));
        assert_eq!(mi.rights.as_deref(), Some("Public domain"));
        assert_eq!(mi.isbn.as_deref(), Some("123"));
    }
}
