// ffprobe invocation shape adapted from https://github.com/theduke/ffprobe-rs, MIT License

use std::{
    error, fmt,
    ffi::OsString,
    io::{self, Read},
    path::{Path, PathBuf},
    process::{self, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use color_eyre::eyre::{self, bail, Context};
use itertools::Itertools;
use serde_with::{serde_as, DisplayFromStr};

use crate::resolve::{ResolvedChapter, SegmentSource};

/// How long one external ffmpeg invocation may run before the run is
/// aborted. A stuck subprocess must not hang the run forever.
pub const DEFAULT_MEDIA_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Oracle for media file properties. The resolver and planner only ever ask
/// these two questions, which keeps them testable without ffprobe.
pub trait MediaProbe {
    fn duration_secs(&self, path: &Path) -> Result<f64, ProbeError>;
    fn bitrate(&self, path: &Path) -> Result<u32, ProbeError>;
}

#[derive(Debug)]
#[non_exhaustive]
pub enum ProbeError {
    Io(io::Error),
    Status(process::Output),
    Deserialize(serde_json::Error),
    MissingField(&'static str),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Io(e) => e.fmt(f),
            ProbeError::Status(o) => {
                write!(
                    f,
                    "ffprobe exited with status code {}: {}",
                    o.status,
                    String::from_utf8_lossy(&o.stderr)
                )
            }
            ProbeError::Deserialize(e) => e.fmt(f),
            ProbeError::MissingField(field) => {
                write!(f, "ffprobe output is missing the {} field", field)
            }
        }
    }
}

impl error::Error for ProbeError {}

#[serde_as]
#[derive(Debug, Default, serde::Deserialize)]
struct FormatInfo {
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    duration: Option<f64>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    bit_rate: Option<u32>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: FormatInfo,
}

/// `MediaProbe` implementation backed by the ffprobe executable.
pub struct Ffprobe;

impl Ffprobe {
    fn probe_format(&self, path: &Path) -> Result<FormatInfo, ProbeError> {
        let mut cmd = Command::new("ffprobe");
        cmd.args([
            "-v",
            "error",
            "-show_entries",
            "format=duration,bit_rate",
            "-print_format",
            "json",
        ]);
        cmd.arg(path);

        let out = cmd.output().map_err(ProbeError::Io)?;
        if !out.status.success() {
            return Err(ProbeError::Status(out));
        }

        let parsed: ProbeOutput =
            serde_json::from_slice(&out.stdout).map_err(ProbeError::Deserialize)?;
        Ok(parsed.format)
    }
}

impl MediaProbe for Ffprobe {
    fn duration_secs(&self, path: &Path) -> Result<f64, ProbeError> {
        self.probe_format(path)?
            .duration
            .ok_or(ProbeError::MissingField("duration"))
    }

    fn bitrate(&self, path: &Path) -> Result<u32, ProbeError> {
        self.probe_format(path)?
            .bit_rate
            .ok_or(ProbeError::MissingField("bit_rate"))
    }
}

/// A single media operation, described as pure data. Built once, never
/// mutated; the executor turns it into an ffmpeg invocation at the point of
/// use.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOp {
    /// Lossless container-level trim of one source file.
    Trim {
        source: PathBuf,
        start: f64,
        end: f64,
    },
    /// Tail of `primary` (from `trim_primary_from` to its end) followed by
    /// the head of `secondary` (up to `take_secondary_to`). Re-encodes at
    /// `target_bitrate`.
    ConcatTrim {
        primary: PathBuf,
        secondary: PathBuf,
        trim_primary_from: f64,
        take_secondary_to: f64,
        target_bitrate: u32,
    },
    /// Concatenation of whole files, with optional metadata tags.
    Concat {
        sources: Vec<PathBuf>,
        tags: Vec<(String, String)>,
        transcode: bool,
    },
}

/// Translates a resolved chapter into the operation that extracts it.
///
/// For a cross-file chapter the two halves are re-encoded at the larger of
/// the two source bitrates, so the louder half is never downsampled at the
/// join.
pub fn plan_segment(chapter: &ResolvedChapter, probe: &dyn MediaProbe) -> eyre::Result<SegmentOp> {
    match &chapter.source {
        SegmentSource::Single { source, start, end } => Ok(SegmentOp::Trim {
            source: source.clone(),
            start: *start,
            end: *end,
        }),
        SegmentSource::Split {
            primary,
            start,
            secondary,
            end_in_secondary,
            ..
        } => {
            let primary_bitrate = probe
                .bitrate(primary)
                .wrap_err_with(|| format!("failed to probe bitrate of {}", primary.display()))?;
            let secondary_bitrate = probe
                .bitrate(secondary)
                .wrap_err_with(|| format!("failed to probe bitrate of {}", secondary.display()))?;

            Ok(SegmentOp::ConcatTrim {
                primary: primary.clone(),
                secondary: secondary.clone(),
                trim_primary_from: *start,
                take_secondary_to: *end_in_secondary,
                target_bitrate: primary_bitrate.max(secondary_bitrate),
            })
        }
    }
}

impl SegmentOp {
    /// The full ffmpeg argument list for this operation.
    pub fn to_args(&self, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();

        match self {
            SegmentOp::Trim { source, start, end } => {
                args.push("-i".into());
                args.push(source.into());
                args.push("-ss".into());
                args.push(format!("{:.3}", start).into());
                args.push("-to".into());
                args.push(format!("{:.3}", end).into());
                args.push("-acodec".into());
                args.push("copy".into());
            }
            SegmentOp::ConcatTrim {
                primary,
                secondary,
                trim_primary_from,
                take_secondary_to,
                target_bitrate,
            } => {
                args.push("-i".into());
                args.push(primary.into());
                args.push("-i".into());
                args.push(secondary.into());
                args.push("-filter_complex".into());
                args.push(
                    format!(
                        "[0:a]atrim=start={:.2}[a1];[1:a]atrim=start=0:end={:.2}[a2];[a1][a2]concat=n=2:v=0:a=1[out]",
                        trim_primary_from, take_secondary_to
                    )
                    .into(),
                );
                args.push("-map".into());
                args.push("[out]".into());
                args.push("-b:a".into());
                args.push(target_bitrate.to_string().into());
            }
            SegmentOp::Concat {
                sources,
                tags,
                transcode,
            } => {
                args.push("-i".into());
                args.push(
                    format!(
                        "concat:{}",
                        sources.iter().map(|p| p.to_string_lossy()).join("|")
                    )
                    .into(),
                );
                for (key, value) in tags {
                    args.push("-metadata".into());
                    args.push(format!("{}={}", key, value).into());
                }
                if *transcode {
                    // Container format (m4b) picks the codec; copy would carry
                    // an MP3 stream into an MP4 container.
                    args.push("-c:a".into());
                    args.push("aac".into());
                } else {
                    args.push("-acodec".into());
                    args.push("copy".into());
                }
            }
        }

        args.push("-hide_banner".into());
        args.push("-loglevel".into());
        args.push("error".into());
        args.push(output.into());
        args
    }
}

/// Runs segment operations through the ffmpeg executable, each under a
/// bounded timeout.
pub struct FfmpegExecutor {
    timeout: Duration,
}

impl Default for FfmpegExecutor {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_MEDIA_TIMEOUT,
        }
    }
}

impl FfmpegExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn execute(&self, op: &SegmentOp, output: &Path) -> eyre::Result<()> {
        log::debug!("ffmpeg {:?} -> {}", op, output.display());

        let mut child = Command::new("ffmpeg")
            .args(op.to_args(output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .wrap_err("failed to launch ffmpeg")?;

        // Drained concurrently: a child that fills the pipe buffer would
        // otherwise block on its writes and never exit.
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = String::new();
                pipe.read_to_string(&mut buf).ok();
                buf
            })
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait().wrap_err("failed to poll ffmpeg")? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    child.kill().ok();
                    child.wait().ok();
                    bail!(
                        "ffmpeg timed out after {:?} while writing {}",
                        self.timeout,
                        output.display()
                    );
                }
                None => thread::sleep(Duration::from_millis(100)),
            }
        };

        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            bail!(
                "ffmpeg exited with {} while writing {}: {}",
                status,
                output.display(),
                stderr.trim()
            );
        }
        if !output.exists() {
            bail!(
                "ffmpeg reported success but produced no file at {}",
                output.display()
            );
        }
        Ok(())
    }
}
