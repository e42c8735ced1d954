use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use color_eyre::eyre::{self, bail, Context};

use crate::{
    complex_duration,
    ffmpeg::MediaProbe,
    naming,
    openbook::TocEntry,
    parts::{parse_path_reference, PartMap},
    provider::ProviderChapter,
    simple_duration,
};

/// Where a chapter's audio lives.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentSource {
    /// The chapter lies entirely within one part file.
    Single {
        source: PathBuf,
        start: f64,
        end: f64,
    },
    /// The chapter starts in the tail of one part file and continues into
    /// the head of the next. `split_point` is the primary file's total
    /// duration; everything from `start` to it belongs to this chapter, plus
    /// the first `end_in_secondary` seconds of `secondary`.
    Split {
        primary: PathBuf,
        start: f64,
        split_point: f64,
        secondary: PathBuf,
        end_in_secondary: f64,
    },
}

/// One chapter with fully resolved boundaries, in TOC order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedChapter {
    /// 0-based position in TOC order.
    pub index: usize,
    pub title: String,
    pub source: SegmentSource,
    pub duration_secs: f64,
}

impl ResolvedChapter {
    pub fn crosses_file_boundary(&self) -> bool {
        matches!(self.source, SegmentSource::Split { .. })
    }

    /// Recomputes the duration from the stored boundaries. Equal to
    /// `duration_secs` by construction.
    pub fn computed_duration(&self) -> f64 {
        match &self.source {
            SegmentSource::Single { start, end, .. } => simple_duration(*start, *end),
            SegmentSource::Split {
                start,
                split_point,
                end_in_secondary,
                ..
            } => complex_duration(*split_point, *start, *end_in_secondary),
        }
    }

    pub fn output_file_name(&self, ext: &str) -> String {
        naming::chapter_file_name(self.index, &self.title, ext)
    }
}

/// Resolves every TOC entry into a chapter with explicit boundaries.
///
/// A TOC entry only encodes where a chapter *starts*, so each chapter's end
/// is taken from the next entry's start, with two terminal rules:
///
/// - the last chapter runs to the end of its file;
/// - when the next chapter starts at offset 0 of a different file, the
///   current chapter also runs to the end of its file (the chapter boundary
///   coincides with the file boundary).
///
/// The remaining case is a chapter split across two files: its audio is the
/// tail of the current file plus the head of the next one.
///
/// Any missing part, malformed path, or failed probe aborts resolution;
/// a silently skipped or misclipped chapter is worse than no output.
pub fn resolve_chapters(
    toc: &[TocEntry],
    parts: &PartMap,
    probe: &dyn MediaProbe,
) -> eyre::Result<Vec<ResolvedChapter>> {
    if toc.is_empty() {
        bail!("the manifest table of contents is empty");
    }

    let mut durations: HashMap<PathBuf, f64> = HashMap::new();
    let mut file_duration = |path: &Path| -> eyre::Result<f64> {
        if let Some(known) = durations.get(path) {
            return Ok(*known);
        }
        let duration = probe
            .duration_secs(path)
            .wrap_err_with(|| format!("failed to probe duration of {}", path.display()))?;
        durations.insert(path.to_path_buf(), duration);
        Ok(duration)
    };

    let mut chapters = Vec::with_capacity(toc.len());
    for (i, entry) in toc.iter().enumerate() {
        let (part_id, start) = parse_path_reference(&entry.path)
            .wrap_err_with(|| format!("chapter {} ({:?})", i, entry.title))?;
        let primary = parts
            .require(&part_id)
            .wrap_err_with(|| format!("chapter {} ({:?})", i, entry.title))?
            .to_path_buf();

        let source = match toc.get(i + 1) {
            None => {
                // Last chapter: runs to the end of its file.
                let end = file_duration(&primary)?;
                SegmentSource::Single {
                    source: primary,
                    start,
                    end,
                }
            }
            Some(next) => {
                let (next_id, next_start) = parse_path_reference(&next.path)
                    .wrap_err_with(|| format!("chapter {} ({:?})", i + 1, next.title))?;
                if next_id == part_id {
                    SegmentSource::Single {
                        source: primary,
                        start,
                        end: next_start,
                    }
                } else if next_start == 0.0 {
                    // The next chapter begins exactly at its file boundary,
                    // so this one simply runs to the end of the current file.
                    let end = file_duration(&primary)?;
                    SegmentSource::Single {
                        source: primary,
                        start,
                        end,
                    }
                } else {
                    let secondary = parts
                        .require(&next_id)
                        .wrap_err_with(|| format!("chapter {} ({:?})", i, entry.title))?
                        .to_path_buf();
                    let split_point = file_duration(&primary)?;
                    SegmentSource::Split {
                        primary,
                        start,
                        split_point,
                        secondary,
                        end_in_secondary: next_start,
                    }
                }
            }
        };

        let duration_secs = match &source {
            SegmentSource::Single { start, end, .. } => simple_duration(*start, *end),
            SegmentSource::Split {
                start,
                split_point,
                end_in_secondary,
                ..
            } => complex_duration(*split_point, *start, *end_in_secondary),
        };

        chapters.push(ResolvedChapter {
            index: i,
            title: entry.title.clone(),
            source,
            duration_secs,
        });
    }

    Ok(chapters)
}

/// Resolves a provider chapter list against one combined source file. Every
/// chapter is a plain trim of that file; the last chapter runs to its end.
pub fn resolve_provider_chapters(
    chapters: &[ProviderChapter],
    combined: &Path,
    probe: &dyn MediaProbe,
) -> eyre::Result<Vec<ResolvedChapter>> {
    if chapters.is_empty() {
        bail!("the provider chapter list is empty");
    }

    let total = probe
        .duration_secs(combined)
        .wrap_err_with(|| format!("failed to probe duration of {}", combined.display()))?;

    let mut resolved = Vec::with_capacity(chapters.len());
    for (i, chapter) in chapters.iter().enumerate() {
        let start = chapter.start_offset_ms as f64 / 1000.0;
        let end = match chapters.get(i + 1) {
            Some(next) => next.start_offset_ms as f64 / 1000.0,
            None => total,
        };
        resolved.push(ResolvedChapter {
            index: i,
            title: chapter.title.clone(),
            source: SegmentSource::Single {
                source: combined.to_path_buf(),
                start,
                end,
            },
            duration_secs: simple_duration(start, end),
        });
    }

    Ok(resolved)
}
