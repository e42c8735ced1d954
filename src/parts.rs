use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use color_eyre::eyre::{self, bail, eyre, Context};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // TOC paths carry a format tag before the part name, e.g.
    // "{AAAA}Fmt425-Part03.mp3". The digits vary per export.
    static ref FORMAT_TAG_REGEX: Regex = Regex::new(r"Fmt\d+-").unwrap();
    static ref PART_ID_REGEX: Regex = Regex::new(r"Part\d+").unwrap();
}

/// Splits a TOC path into the part identifier it points at and the start
/// offset within that part. Offsets are interpreted as seconds (the unit
/// Libby exports use for the `#<number>` suffix); fractional values are
/// accepted.
///
/// A malformed offset is an error, not a silent zero: defaulting would shift
/// every downstream chapter boundary.
pub fn parse_path_reference(path: &str) -> eyre::Result<(String, f64)> {
    let mut rest = path;
    if let Some(tag) = FORMAT_TAG_REGEX.find(rest) {
        rest = &rest[tag.end()..];
    }

    let (name, offset) = match rest.split_once('#') {
        Some((name, raw)) => {
            let seconds: f64 = raw
                .parse()
                .wrap_err_with(|| format!("invalid offset {:?} in TOC path {:?}", raw, path))?;
            (name, seconds)
        }
        None => (rest, 0.0),
    };

    let part_id = PART_ID_REGEX
        .find(name)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| eyre!("no part identifier in TOC path {:?}", path))?;

    Ok((part_id, offset))
}

/// Maps part identifiers ("Part01", "Part02", ...) to the audio files on
/// disk. Iteration order follows the identifier, which matches playback
/// order for Libby's zero-padded part names.
#[derive(Debug, Clone)]
pub struct PartMap {
    parts: BTreeMap<String, PathBuf>,
}

impl PartMap {
    /// Scans a directory (non-recursively) for `.mp3` part files.
    pub fn scan(dir: &Path) -> eyre::Result<Self> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)
            .wrap_err_with(|| format!("failed to read directory {}", dir.display()))?
        {
            let path = entry
                .wrap_err_with(|| format!("failed to read directory {}", dir.display()))?
                .path();
            if path
                .extension()
                .map_or(false, |ext| ext.eq_ignore_ascii_case("mp3"))
            {
                files.push(path);
            }
        }

        let map = Self::from_files(files)?;
        if map.is_empty() {
            bail!("no part files found in {}", dir.display());
        }
        Ok(map)
    }

    pub fn from_files(files: Vec<PathBuf>) -> eyre::Result<Self> {
        let mut parts = BTreeMap::new();
        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let id = match PART_ID_REGEX.find(&name) {
                Some(m) => m.as_str().to_string(),
                None => {
                    log::debug!("skipping audio file without part marker: {}", path.display());
                    continue;
                }
            };
            if let Some(previous) = parts.insert(id.clone(), path.clone()) {
                bail!(
                    "duplicate part identifier {} ({} and {})",
                    id,
                    previous.display(),
                    path.display()
                );
            }
        }
        Ok(Self { parts })
    }

    pub fn get(&self, part_id: &str) -> Option<&Path> {
        self.parts.get(part_id).map(PathBuf::as_path)
    }

    /// Looks up a part that a TOC entry references. A missing part means the
    /// export is incomplete and the whole run must abort.
    pub fn require(&self, part_id: &str) -> eyre::Result<&Path> {
        self.get(part_id)
            .ok_or_else(|| eyre!("part {} is referenced by the TOC but no matching file exists", part_id))
    }

    /// Part files in playback order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.parts.values().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reference_with_offset() {
        let (part, offset) = parse_path_reference("{AAAA}Fmt425-Part03.mp3#3049").unwrap();
        assert_eq!(part, "Part03");
        assert_eq!(offset, 3049.0);
    }

    #[test]
    fn parses_reference_without_offset() {
        let (part, offset) = parse_path_reference("{AAAA}Fmt425-Part01.mp3").unwrap();
        assert_eq!(part, "Part01");
        assert_eq!(offset, 0.0);
    }

    #[test]
    fn parses_fractional_offset() {
        let (_, offset) = parse_path_reference("Fmt425-Part02.mp3#12.5").unwrap();
        assert_eq!(offset, 12.5);
    }

    #[test]
    fn tolerates_missing_format_tag() {
        let (part, offset) = parse_path_reference("Part07.mp3#9").unwrap();
        assert_eq!(part, "Part07");
        assert_eq!(offset, 9.0);
    }

    #[test]
    fn rejects_unparseable_offset() {
        assert!(parse_path_reference("Fmt425-Part01.mp3#abc").is_err());
    }

    #[test]
    fn rejects_path_without_part_marker() {
        assert!(parse_path_reference("Fmt425-cover.jpg").is_err());
    }

    #[test]
    fn map_orders_parts_and_resolves_ids() {
        let map = PartMap::from_files(vec![
            PathBuf::from("/b/Book-Part02.mp3"),
            PathBuf::from("/b/Book-Part01.mp3"),
            PathBuf::from("/b/notes.mp3"),
        ])
        .unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("Part01"), Some(Path::new("/b/Book-Part01.mp3")));
        let ordered: Vec<_> = map.paths().collect();
        assert_eq!(
            ordered,
            vec![Path::new("/b/Book-Part01.mp3"), Path::new("/b/Book-Part02.mp3")]
        );
    }

    #[test]
    fn duplicate_part_identifiers_are_rejected() {
        let result = PartMap::from_files(vec![
            PathBuf::from("/a/Book-Part01.mp3"),
            PathBuf::from("/b/Other-Part01.mp3"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn missing_part_lookup_is_an_error() {
        let map = PartMap::from_files(vec![PathBuf::from("/b/Book-Part01.mp3")]).unwrap();
        assert!(map.require("Part09").is_err());
    }

    #[test]
    fn scan_picks_up_mp3_files_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["Book-Part01.mp3", "Book-Part02.MP3", "openbook.json"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let map = PartMap::scan(dir.path()).unwrap();
        assert_eq!(map.len(), 2);
    }
}
