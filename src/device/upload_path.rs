//! Destination paths for uploaded books.

use crate::book::{BookMetadata, UNKNOWN};
use crate::fs::join;

/// Longest absolute path the layout produces.
pub const MAX_PATH_LEN: usize = 245;

/// Reduce a path component to characters every device file system accepts.
pub fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_ascii_control() || !c.is_ascii() => '_',
            c => c,
        })
        .collect();
    cleaned.trim().trim_end_matches('.').trim().to_string()
}

/// Computes the slot-relative path for a new book.
///
/// With `use_subdirs` the book goes below `book_dir` in:
/// - `news/<title>/<timestamp>` when a tag starts with `News`
/// - the components of the first tag starting with `/`
/// - `<authors>/<title>` otherwise
///
/// When `<root>/<path>` would exceed [`MAX_PATH_LEN`] characters every
/// generated component is shortened by the same amount, the file name keeping
/// its extension.
pub fn create_upload_path(
    root: &str,
    book_dir: &str,
    use_subdirs: bool,
    metadata: &BookMetadata,
    file_name: &str,
) -> String {
    let mut resizable: Vec<String> = Vec::new();

    if use_subdirs {
        for tag in &metadata.tags {
            if tag.starts_with("News") {
                resizable.push("news".to_string());
                resizable.extend(
                    [
                        sanitize(&metadata.title),
                        metadata
                            .timestamp
                            .map(|t| sanitize(&t.format("%Y-%m-%d %H:%M:%S").to_string()))
                            .unwrap_or_default(),
                    ]
                    .into_iter()
                    .filter(|c| !c.is_empty()),
                );
                break;
            } else if tag.starts_with('/') {
                resizable.extend(tag.split('/').map(sanitize).filter(|c| !c.is_empty()));
                break;
            }
        }

        if resizable.is_empty() {
            let title = if metadata.title.is_empty() {
                UNKNOWN
            } else {
                metadata.title.as_str()
            };
            resizable.extend(
                [sanitize(&metadata.authors_display()), sanitize(title)]
                    .into_iter()
                    .filter(|c| !c.is_empty()),
            );
        }
    }

    let fname = match sanitize(file_name) {
        name if name.is_empty() => "book".to_string(),
        name => name,
    };
    resizable.push(fname);

    let relative = build(book_dir, &resizable);
    let full_len = root.trim_end_matches(['/', '\\']).chars().count() + 1 + relative.len();
    if full_len <= MAX_PATH_LEN {
        return relative;
    }

    let extra = full_len - MAX_PATH_LEN;
    let delta = extra.div_ceil(resizable.len());
    let last = resizable.len() - 1;
    let shortened: Vec<String> = resizable
        .iter()
        .enumerate()
        .map(|(i, c)| shorten(c, delta, i == last))
        .collect();

    tracing::debug!(
        original = %relative,
        delta,
        "Shortened upload path to fit device limits"
    );
    build(book_dir, &shortened)
}

fn build(book_dir: &str, components: &[String]) -> String {
    components
        .iter()
        .filter(|c| !c.is_empty())
        .fold(book_dir.trim_matches('/').to_string(), |acc, c| join(&acc, c))
}

/// Components are ASCII after `sanitize`, so byte slicing is safe.
fn shorten(component: &str, delta: usize, is_file: bool) -> String {
    if !is_file {
        return component[..component.len().saturating_sub(delta)].to_string();
    }

    let (stem, ext) = match component.rfind('.') {
        Some(i) if i > 0 => component.split_at(i),
        _ => (component, ""),
    };
    let keep = stem.len().saturating_sub(delta);
    let shortened = format!("{}{}", &stem[..keep], ext);
    if shortened.is_empty() || shortened.starts_with('.') {
        format!("{}{}", component.get(..1).unwrap_or_default(), shortened)
    } else {
        shortened
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn book(title: &str, authors: &[&str]) -> BookMetadata {
        let mut mi = BookMetadata::new(title);
        mi.authors = authors.iter().map(|s| s.to_string()).collect();
        mi
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("AC/DC: Live?"), "AC_DC_ Live_");
        assert_eq!(sanitize("Résumé"), "R_sum_");
        assert_eq!(sanitize(" trailing. "), "trailing");
    }

    #[test]
    fn test_flat_layout_without_subdirs() {
        let mi = book("Dune", &["Frank Herbert"]);
        assert_eq!(
            create_upload_path("/media/kindle", "documents", false, &mi, "Dune.mobi"),
            "documents/Dune.mobi"
        );
    }

    #[test]
    fn test_author_title_layout() {
        let mi = book("Good Omens", &["Terry Pratchett", "Neil Gaiman"]);
        assert_eq!(
            create_upload_path("/media/nook", "my documents", true, &mi, "omens.epub"),
            "my documents/Terry Pratchett & Neil Gaiman/Good Omens/omens.epub"
        );
    }

    #[test]
    fn test_news_and_slash_tags() {
        let mut news = book("Daily Planet", &[]);
        news.tags = vec!["News".into()];
        news.timestamp = Some(chrono::Utc.with_ymd_and_hms(2010, 5, 15, 12, 30, 0).unwrap());
        assert_eq!(
            create_upload_path("/mnt", "", true, &news, "planet.epub"),
            "news/Daily Planet/2010-05-15 12_30_00/planet.epub"
        );

        let mut tagged = book("X", &["Y"]);
        tagged.tags = vec!["fiction".into(), "/Shelf/SciFi".into()];
        assert_eq!(
            create_upload_path("/mnt", "eBooks", true, &tagged, "x.epub"),
            "eBooks/Shelf/SciFi/x.epub"
        );
    }

    #[test]
    fn test_long_paths_are_shortened() {
        let long = "T".repeat(150);
        let mi = book(&long, &["A".repeat(100).as_str()]);
        let file = format!("{}.epub", "f".repeat(60));
        let root = "/media/device";
        let path = create_upload_path(root, "documents", true, &mi, &file);

        assert!(root.len() + 1 + path.len() <= MAX_PATH_LEN);
        assert!(path.ends_with(".epub"));
        assert!(path.starts_with("documents/"));
        assert_eq!(path.split('/').count(), 4);
    }

    #[test]
    fn test_shorten_keeps_extension() {
        assert_eq!(shorten("dune.epub", 3, true), "d.epub");
        assert_eq!(shorten("dune.epub", 4, true), "d.epub");
        assert_eq!(shorten("dune.epub", 50, true), "d.epub");
        assert_eq!(shorten("README", 50, true), "R");
        assert_eq!(shorten("Frank Herbert", 50, false), "");
        assert_eq!(shorten("Frank Herbert", 8, false), "Frank");
    }
}
