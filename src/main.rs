use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{Parser, ValueEnum};
use color_eyre::eyre::{self, bail, Context};
use env_logger::Env;
use itertools::Itertools;

use libby_chapterizer::{
    ffmetadata::FfmetadataWriter,
    ffmpeg::{plan_segment, FfmpegExecutor, Ffprobe, MediaProbe, SegmentOp},
    format_duration, naming,
    openbook::Openbook,
    parts::PartMap,
    playlist::{Playlist, Track},
    provider::{BookDetails, CatalogClient, ChapterList},
    resolve::{resolve_chapters, resolve_provider_chapters, ResolvedChapter},
};

/// Converts a Libby/OverDrive audiobook export into a chaptered audiobook.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to the openbook.json manifest
    #[arg(short, long)]
    json: PathBuf,

    /// Directory to write output to (defaults to the manifest's directory)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Cut chapters from the provider chapter list instead of the manifest
    /// table of contents
    #[arg(short = 'a', long)]
    audible_chapters: bool,

    /// Produce one combined audiobook file instead of a file per chapter
    #[arg(short = 's', long)]
    single_file: bool,

    /// Output container format
    #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Mp3)]
    format: OutputFormat,
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
enum OutputFormat {
    Mp3,
    M4b,
}

impl OutputFormat {
    fn extension(self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "mp3",
            OutputFormat::M4b => "m4b",
        }
    }

    fn transcodes(self) -> bool {
        matches!(self, OutputFormat::M4b)
    }
}

/// All run-steering options, resolved once at startup.
#[derive(Debug, Clone)]
struct RunConfig {
    json_path: PathBuf,
    source_dir: PathBuf,
    out_root: PathBuf,
    use_provider_chapters: bool,
    single_file: bool,
    format: OutputFormat,
}

impl RunConfig {
    fn from_cli(cli: Cli) -> Self {
        let source_dir = cli
            .json
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            out_root: cli.out.unwrap_or_else(|| source_dir.clone()),
            source_dir,
            json_path: cli.json,
            use_provider_chapters: cli.audible_chapters,
            single_file: cli.single_file,
            format: cli.format,
        }
    }
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = RunConfig::from_cli(Cli::parse());
    run(&config)
}

fn run(config: &RunConfig) -> eyre::Result<()> {
    if config.format.transcodes() && !config.single_file {
        bail!("m4b output requires --single-file");
    }

    let start_time = chrono::Local::now();

    let book = Openbook::load(&config.json_path)?;
    let parts = PartMap::scan(&config.source_dir)?;
    let probe = Ffprobe;

    // The spine already carries per-part durations, so no probing is needed
    // for the banner or the catalog runtime match.
    let total_secs = book.spine_duration_secs();
    let runtime_min = (total_secs / 60.0) as i64;

    let client = match CatalogClient::new() {
        Ok(client) => Some(client),
        Err(err) => {
            log::warn!("catalog client unavailable: {err:#}");
            None
        }
    };
    let details = lookup_details(client.as_ref(), &book, runtime_min);

    log::info!("Title:    {}", details.title);
    log::info!("Series:   {}", details.series_name());
    log::info!("Author:   {}", book.author_names().iter().join(", "));
    log::info!("Narrator: {}", book.narrator_names().iter().join(", "));
    log::info!("Duration: {}", format_duration(total_secs));
    log::info!("============================");

    let out_dir = naming::output_dir(&config.out_root, &details);
    fs::create_dir_all(&out_dir)
        .wrap_err_with(|| format!("failed to create output directory {}", out_dir.display()))?;

    let executor = FfmpegExecutor::default();

    let provider_chapters = if config.use_provider_chapters {
        fetch_provider_chapters(client.as_ref(), &details)
    } else {
        None
    };

    // The provider chapter list is positioned on the whole book's timeline,
    // so it is cut from a single concatenation of all parts.
    let mut temp_combined: Option<PathBuf> = None;
    let chapters = match &provider_chapters {
        Some(list) => {
            let combined = out_dir.join(format!(
                ".{}-combined.mp3",
                naming::normalize_name(&details.title)
            ));
            log::info!("Concatenating {} parts for provider chapter cuts", parts.len());
            temp_combined = Some(combined.clone());
            let op = SegmentOp::Concat {
                sources: parts.paths().map(Path::to_path_buf).collect(),
                tags: vec![],
                transcode: false,
            };
            executor
                .execute(&op, &combined)
                .and_then(|()| resolve_provider_chapters(&list.chapters, &combined, &probe))
        }
        None => resolve_chapters(&book.nav.toc, &parts, &probe),
    };

    // The temporary combined file is removed no matter how production went.
    let result = chapters.and_then(|chapters| {
        produce_outputs(config, &details, &parts, &chapters, &probe, &executor, &out_dir)
    });
    if let Some(temp) = temp_combined.as_deref().filter(|p| p.exists()) {
        if let Err(err) = fs::remove_file(temp) {
            log::warn!("failed to remove temporary file {}: {}", temp.display(), err);
        }
    }
    let chapter_count = result?;

    let elapsed = (chrono::Local::now() - start_time)
        .to_std()
        .unwrap_or(Duration::ZERO);
    log::info!(
        "Done: {} chapters in {:.2} seconds",
        chapter_count,
        elapsed.as_secs_f32()
    );

    Ok(())
}

/// Catalog metadata with graceful degradation: any lookup failure falls back
/// to the manifest's own metadata.
fn lookup_details(client: Option<&CatalogClient>, book: &Openbook, runtime_min: i64) -> BookDetails {
    let author = book.primary_author().unwrap_or_default();
    let narrator = book.primary_narrator().unwrap_or_default();

    let Some(client) = client else {
        return BookDetails::from_openbook(book);
    };

    match client.lookup_asin(&book.title.main, author, narrator, runtime_min) {
        Ok(Some(asin)) => match client.fetch_details(&asin) {
            Ok(mut details) => {
                if details.asin.is_empty() {
                    details.asin = asin;
                }
                details
            }
            Err(err) => {
                log::warn!("failed to fetch catalog metadata for {}: {err:#}", asin);
                BookDetails::from_openbook(book)
            }
        },
        Ok(None) => {
            log::info!("no catalog match; using manifest metadata");
            BookDetails::from_openbook(book)
        }
        Err(err) => {
            log::warn!("catalog lookup failed: {err:#}");
            BookDetails::from_openbook(book)
        }
    }
}

/// Provider chapter list, or `None` (with a warning) when it cannot be
/// fetched; the caller then falls back to the manifest TOC.
fn fetch_provider_chapters(
    client: Option<&CatalogClient>,
    details: &BookDetails,
) -> Option<ChapterList> {
    if details.asin.is_empty() {
        log::warn!("no catalog match; falling back to the manifest table of contents");
        return None;
    }
    let client = client?;
    match client.fetch_chapters(&details.asin) {
        Ok(list) if !list.chapters.is_empty() => {
            if !list.is_accurate {
                log::warn!("provider marks its chapter list as inaccurate");
            }
            Some(list)
        }
        Ok(_) => {
            log::warn!(
                "provider returned no chapters for {}; falling back to the manifest table of contents",
                details.asin
            );
            None
        }
        Err(err) => {
            log::warn!("failed to fetch provider chapters: {err:#}");
            None
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn produce_outputs(
    config: &RunConfig,
    details: &BookDetails,
    parts: &PartMap,
    chapters: &[ResolvedChapter],
    probe: &dyn MediaProbe,
    executor: &FfmpegExecutor,
    out_dir: &Path,
) -> eyre::Result<usize> {
    let ext = config.format.extension();
    let base_name = naming::normalize_name(&details.title);

    if config.single_file {
        let output = out_dir.join(format!("{}.{}", base_name, ext));
        log::info!("Writing combined audiobook to {}", output.display());
        let op = SegmentOp::Concat {
            sources: parts.paths().map(Path::to_path_buf).collect(),
            tags: combined_tags(details),
            transcode: config.format.transcodes(),
        };
        executor.execute(&op, &output)?;
    } else {
        let mut tracks = Vec::with_capacity(chapters.len());
        for chapter in chapters {
            log::info!(
                "Processing chapter {:02}: {} ({})",
                chapter.index,
                chapter.title,
                format_duration(chapter.duration_secs)
            );
            let file_name = chapter.output_file_name(ext);
            let output = out_dir.join(&file_name);
            let op = plan_segment(chapter, probe)?;
            executor.execute(&op, &output).wrap_err_with(|| {
                format!("chapter {} ({:?}) failed", chapter.index, chapter.title)
            })?;
            tracks.push(Track {
                title: chapter.title.clone(),
                duration_secs: chapter.duration_secs,
                file_name,
            });
        }

        let playlist = Playlist {
            title: details.title.clone(),
            author: details
                .authors
                .first()
                .map(|a| a.name.clone())
                .unwrap_or_default(),
            book_title: details.title.clone(),
            tracks,
        };
        playlist.write_file(&out_dir.join(format!("{}.m3u", base_name)))?;
    }

    write_ffmetadata(out_dir, &base_name, details, chapters)?;
    Ok(chapters.len())
}

fn combined_tags(details: &BookDetails) -> Vec<(String, String)> {
    let mut tags = vec![
        ("title".to_string(), details.title.clone()),
        ("album".to_string(), details.title.clone()),
    ];
    if let Some(author) = details.authors.first() {
        tags.push(("artist".to_string(), author.name.clone()));
    }
    if !details.asin.is_empty() {
        tags.push(("ASIN".to_string(), details.asin.clone()));
    }
    tags
}

/// Chapter sidecar on the whole book's timeline, cumulative from 0.
fn write_ffmetadata(
    out_dir: &Path,
    base_name: &str,
    details: &BookDetails,
    chapters: &[ResolvedChapter],
) -> eyre::Result<()> {
    let path = out_dir.join(format!("{}.ffmetadata", base_name));
    let file = File::create(&path)
        .wrap_err_with(|| format!("failed to create chapter sidecar {}", path.display()))?;
    let mut writer = FfmetadataWriter::new(Box::new(file));

    writer.write_header()?;
    writer.write_tag("title", &details.title)?;
    if let Some(author) = details.authors.first() {
        writer.write_tag("artist", &author.name)?;
    }
    if !details.series_name().is_empty() {
        writer.write_tag("series", details.series_name())?;
        if let Some(position) = details.series_position() {
            writer.write_tag("number", &format!("{:.1}", position))?;
        }
    }
    if !details.asin.is_empty() {
        writer.write_tag("asin", &details.asin)?;
    }

    let mut cursor = Duration::ZERO;
    for chapter in chapters {
        let end = cursor + Duration::from_secs_f64(chapter.duration_secs);
        writer.write_chapter(&cursor, &end, &chapter.title)?;
        cursor = end;
    }

    Ok(())
}
