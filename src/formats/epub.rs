//! EPUB metadata reader.

use crate::book::BookMetadata;
use crate::error::FormatError;
use crate::formats::MetadataReader;
use roxmltree::Document;
use std::io::{Cursor, Read};
use zip::ZipArchive;

type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

/// Reader for EPUB files.
pub struct EpubReader;

impl EpubReader {
    /// Find the OPF file path from container.xml.
    fn find_opf_path(archive: &mut Archive<'_>) -> Result<String, FormatError> {
        let mut container = archive.by_name("META-INF/container.xml")?;
        let mut content = String::new();
        container.read_to_string(&mut content)?;

        let doc = Document::parse(&content)?;

        doc.descendants()
            .find(|n| n.has_tag_name("rootfile"))
            .and_then(|n| n.attribute("full-path"))
            .map(String::from)
            .ok_or_else(|| FormatError::InvalidFormat("No rootfile in container.xml".into()))
    }

    /// Parse the OPF file into `mi`, returning the cover href if one is declared.
    fn parse_opf(content: &str, mi: &mut BookMetadata) -> Result<Option<String>, FormatError> {
        let doc = Document::parse(content)?;
        let mut cover_id: Option<String> = None;

        for node in doc.descendants() {
            let text = node.text().map(str::trim).filter(|t| !t.is_empty());
            match (node.tag_name().name(), text) {
                ("title", Some(text)) => mi.title = text.to_string(),
                ("creator", Some(text)) => {
                    mi.authors.push(text.to_string());
                    if mi.author_sort.is_none() {
                        mi.author_sort = node
                            .attributes()
                            .find(|a| a.name() == "file-as")
                            .map(|a| a.value().to_string());
                    }
                }
                ("description", Some(text)) => mi.description = Some(text.to_string()),
                ("publisher", Some(text)) => mi.publisher = Some(text.to_string()),
                ("language", Some(text)) => mi.language = Some(text.to_string()),
                ("date", Some(text)) => mi.published = Some(text.to_string()),
                ("subject", Some(text)) => mi.tags.push(text.to_string()),
                ("rights", Some(text)) => mi.rights = Some(text.to_string()),
                ("identifier", Some(text)) => {
                    let is_isbn_scheme = node
                        .attributes()
                        .any(|a| a.name() == "scheme" && a.value().eq_ignore_ascii_case("isbn"));
                    let digits: String = text
                        .chars()
                        .filter(|c| c.is_ascii_digit() || *c == 'X' || *c == 'x')
                        .collect();
                    if is_isbn_scheme || digits.len() == 10 || digits.len() == 13 {
                        mi.isbn = Some(digits);
                    }
                }
                ("meta", _) => match node.attribute("name") {
                    Some("cover") => cover_id = node.attribute("content").map(String::from),
                    Some("calibre:series") => {
                        mi.series = node.attribute("content").map(String::from)
                    }
                    Some("calibre:series_index") => {
                        mi.series_index = node.attribute("content").and_then(|i| i.parse().ok())
                    }
                    _ => {}
                },
                _ => {}
            }
        }

        if let Some(ref cover_id) = cover_id
            && let Some(item) = doc.descendants().find(|n| {
                n.tag_name().name() == "item" && n.attribute("id") == Some(cover_id.as_str())
            })
        {
            return Ok(item.attribute("href").map(String::from));
        }

        // Fallback: common cover image names in the manifest
        let fallback = doc
            .descendants()
            .filter(|n| n.tag_name().name() == "item")
            .filter_map(|n| n.attribute("href"))
            .find(|href| {
                let lower = href.to_lowercase();
                lower.contains("cover")
                    && (lower.ends_with(".jpg") || lower.ends_with(".jpeg") || lower.ends_with(".png"))
            });

        Ok(fallback.map(String::from))
    }

    /// Read the cover image named by the OPF.
    fn read_cover(
        archive: &mut Archive<'_>,
        opf_dir: &str,
        cover_href: &str,
    ) -> Result<Vec<u8>, FormatError> {
        let cover_path = if opf_dir.is_empty() {
            cover_href.to_string()
        } else {
            format!("{}/{}", opf_dir.trim_end_matches('/'), cover_href)
        };

        let actual_path = if archive.file_names().any(|n| n == cover_path) {
            cover_path
        } else {
            cover_href.to_string()
        };

        let mut data = Vec::new();
        archive.by_name(&actual_path)?.read_to_end(&mut data)?;
        Ok(data)
    }
}

impl MetadataReader for EpubReader {
    fn read_metadata(&self, data: &[u8], file_name: &str) -> Result<BookMetadata, FormatError> {
        let mut archive = ZipArchive::new(Cursor::new(data))?;

        let opf_path = Self::find_opf_path(&mut archive)?;
        let opf_dir = opf_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");

        let mut opf_content = String::new();
        archive
            .by_name(&opf_path)?
            .read_to_string(&mut opf_content)?;

        let mut mi = BookMetadata::from_file_name(file_name);
        let cover_href = Self::parse_opf(&opf_content, &mut mi)?;

        if let Some(href) = cover_href {
            match Self::read_cover(&mut archive, opf_dir, &href) {
                Ok(cover) => mi.cover = Some(cover),
                Err(e) => tracing::debug!(file = file_name, error = %e, "EPUB cover not readable"),
            }
        }

        Ok(mi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_epub(opf: &str) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let options = SimpleFileOptions::default();
            zip.start_file("META-INF/container.xml", options).unwrap();
            zip.write_all(
                br#"<?xml version="1.0"?>
<container xmlns="urn:oasis:names:tc:opendocument:xmlns:container" version="1.0">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#,
            )
            .unwrap();
            zip.start_file("OEBPS/content.opf", options).unwrap();
            zip.write_all(opf.as_bytes()).unwrap();
            zip.start_file("OEBPS/cover.jpg", options).unwrap();
            zip.write_all(b"not really a jpeg").unwrap();
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_reads_opf_metadata_and_cover() {
        let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
    <dc:title>Dune</dc:title>
    <dc:creator opf:file-as="Herbert, Frank">Frank Herbert</dc:creator>
    <dc:publisher>Chilton</dc:publisher>
    <dc:identifier opf:scheme="ISBN">978-0-441-01359-3</dc:identifier>
    <dc:subject>Science Fiction</dc:subject>
    <meta name="cover" content="cover-img"/>
    <meta name="calibre:series" content="Dune"/>
    <meta name="calibre:series_index" content="1"/>
  </metadata>
  <manifest><item id="cover-img" href="cover.jpg" media-type="image/jpeg"/></manifest>
</package>"#;
        let data = build_epub(opf);

        let mi = EpubReader.read_metadata(&data, "dune.epub").unwrap();
        assert_eq!(mi.title, "Dune");
        assert_eq!(mi.authors, vec!["Frank Herbert".to_string()]);
        assert_eq!(mi.publisher.as_deref(), Some("Chilton"));
        assert_eq!(mi.isbn.as_deref(), Some("9780441013593"));
        assert_eq!(mi.tags, vec!["Science Fiction".to_string()]);
        assert_eq!(mi.series.as_deref(), Some("Dune"));
        assert_eq!(mi.series_index, Some(1.0));
        assert_eq!(mi.cover.as_deref(), Some(&b"not really a jpeg"[..]));
    }

    #[test]
    fn test_rejects_non_zip() {
        assert!(EpubReader.read_metadata(b"plain text", "x.epub").is_err());
    }
}
