//! HTML metadata reader: calibre-style comment headers, then `<title>`.

use crate::book::BookMetadata;
use crate::error::FormatError;
use crate::formats::{MetadataReader, decode_text};
use regex::Regex;
use std::sync::LazyLock;

fn comment_field(name: &str) -> Regex {
    Regex::new(&format!(
        r#"(?s)<!--.*?{name}=(?:"([^"]+?)"|'([^']+?)').*?-->"#
    ))
    .expect("valid regex")
}

static TITLE_COMMENT: LazyLock<Regex> = LazyLock::new(|| comment_field("TITLE"));
static AUTHOR_COMMENT: LazyLock<Regex> = LazyLock::new(|| comment_field("AUTHOR"));
static PUBLISHER_COMMENT: LazyLock<Regex> = LazyLock::new(|| comment_field("PUBLISHER"));
static ISBN_COMMENT: LazyLock<Regex> = LazyLock::new(|| comment_field("ISBN"));
static TITLE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<title>([^<>]+?)</title>").expect("valid regex"));
static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[xX][0-9a-fA-F]+|#\d+|[a-zA-Z]+);").expect("valid regex"));

/// Reader for HTML files.
pub struct HtmlReader;

fn capture(re: &Regex, src: &str) -> Option<String> {
    let caps = re.captures(src)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().trim().to_string())
}

/// Replace HTML character references with the characters they name.
pub(crate) fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse().ok().and_then(char::from_u32)
            } else {
                match name {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some('\u{a0}'),
                    _ => None,
                }
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

impl MetadataReader for HtmlReader {
    fn read_metadata(&self, data: &[u8], file_name: &str) -> Result<BookMetadata, FormatError> {
        let src = decode_text(data);
        let mut mi = BookMetadata::from_file_name(file_name);

        if let Some(title) = capture(&TITLE_COMMENT, &src).or_else(|| capture(&TITLE_TAG, &src)) {
            mi.title = decode_entities(&title);
        }
        if let Some(author) = capture(&AUTHOR_COMMENT, &src) {
            mi.authors = vec![decode_entities(&author.replace(',', ";"))];
        }
        mi.publisher = capture(&PUBLISHER_COMMENT, &src);
        mi.isbn = capture(&ISBN_COMMENT, &src).map(|isbn| {
            isbn.chars()
                .filter(|c| c.is_ascii_digit() || *c == 'x' || *c == 'X')
                .collect()
        });

        Ok(mi)
    }
}
