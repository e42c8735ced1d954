use std::path::{Path, PathBuf};

use crate::provider::BookDetails;

/// Characters that are illegal in file names on at least one supported
/// filesystem.
const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Replaces filesystem-illegal characters with `-`. Total and idempotent.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .map(|c| if ILLEGAL_CHARS.contains(&c) { '-' } else { c })
        .collect()
}

/// File name for one chapter: `[NN]. Title.ext`, where the zero-padded
/// ordinal keeps directory listings in playback order.
pub fn chapter_file_name(index: usize, title: &str, ext: &str) -> String {
    format!("[{:02}]. {}.{}", index, normalize_name(title), ext)
}

/// Output directory for a book: `<root>/<author>/<series>/<title>`, with the
/// title decorated with the zero-padded series position and the catalog
/// identifier when known, e.g. `[0004.0]. Some Book (B00ABCDEF)`.
pub fn output_dir(out_root: &Path, details: &BookDetails) -> PathBuf {
    let mut leaf = details.title.clone();
    if !details.asin.is_empty() {
        leaf = format!("{} ({})", leaf, details.asin);
    }
    if let Some(position) = details.series_position() {
        leaf = format!("[{:06.1}]. {}", position, leaf);
    }

    let author = details
        .authors
        .first()
        .map(|a| a.name.as_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("Unknown Author");

    let mut dir = out_root.join(normalize_name(author));
    let series = details.series_name();
    if !series.is_empty() {
        dir = dir.join(normalize_name(series));
    }
    dir.join(normalize_name(&leaf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Person, Series};

    #[test]
    fn normalize_replaces_illegal_characters() {
        assert_eq!(normalize_name(r#"Who? What: A "Story"/Tale"#), "Who- What- A -Story--Tale");
    }

    #[test]
    fn normalize_is_idempotent() {
        for s in ["plain", "a/b\\c", "<>:\"|?*", "Chapter 1: The End?"] {
            let once = normalize_name(s);
            assert_eq!(normalize_name(&once), once);
        }
    }

    #[test]
    fn chapter_file_names_are_zero_padded() {
        assert_eq!(chapter_file_name(0, "Prologue", "mp3"), "[00]. Prologue.mp3");
        assert_eq!(
            chapter_file_name(12, "Chapter 12: Why?", "mp3"),
            "[12]. Chapter 12- Why-.mp3"
        );
    }

    #[test]
    fn output_dir_decorates_title_with_position_and_asin() {
        let details = BookDetails {
            asin: "B00ABCDEF".into(),
            title: "Some Book".into(),
            authors: vec![Person {
                name: "Jane Doe".into(),
            }],
            series_primary: Some(Series {
                name: "Some Series".into(),
                position: "Book 4".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            output_dir(Path::new("/out"), &details),
            Path::new("/out/Jane Doe/Some Series/[0004.0]. Some Book (B00ABCDEF)")
        );
    }

    #[test]
    fn output_dir_without_series_or_asin() {
        let details = BookDetails {
            title: "Standalone".into(),
            authors: vec![Person {
                name: "Jane Doe".into(),
            }],
            ..Default::default()
        };
        assert_eq!(
            output_dir(Path::new("/out"), &details),
            Path::new("/out/Jane Doe/Standalone")
        );
    }
}
