use std::{fs, path::Path};

use color_eyre::eyre::{self, Context};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

lazy_static! {
    // Libby uses several role spellings across exports ("author"/"aut",
    // "narrator"/"nrt").
    static ref AUTHOR_ROLE_REGEX: Regex = Regex::new(r"^aut(hor)?$").unwrap();
    static ref NARRATOR_ROLE_REGEX: Regex = Regex::new(r"^n(arrator|rt)?$").unwrap();
}

/// The `openbook.json` manifest that ships with a Libby/OverDrive audiobook
/// export. Only the fields this tool consumes are modeled.
#[derive(Debug, Clone, Deserialize)]
pub struct Openbook {
    #[serde(default)]
    pub creator: Vec<Creator>,
    #[serde(default)]
    pub description: Description,
    pub nav: Nav,
    #[serde(default)]
    pub spine: Vec<SpineItem>,
    pub title: Title,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Creator {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Description {
    #[serde(default)]
    pub full: String,
    #[serde(default)]
    pub short: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Nav {
    #[serde(default)]
    pub toc: Vec<TocEntry>,
}

/// One table-of-contents entry: a chapter title plus a pointer into a part
/// file, with an optional intra-file start offset. TOC order is chapter
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TocEntry {
    pub path: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpineItem {
    #[serde(rename = "audio-bitrate", default)]
    pub audio_bitrate: u32,
    #[serde(rename = "audio-duration", default)]
    pub audio_duration: f64,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Title {
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub main: String,
    #[serde(default)]
    pub subtitle: String,
}

impl Openbook {
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let data = fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read manifest {}", path.display()))?;
        serde_json::from_str(&data)
            .wrap_err_with(|| format!("failed to parse manifest {}", path.display()))
    }

    pub fn author_names(&self) -> Vec<&str> {
        self.creator
            .iter()
            .filter(|c| AUTHOR_ROLE_REGEX.is_match(&c.role))
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn narrator_names(&self) -> Vec<&str> {
        self.creator
            .iter()
            .filter(|c| NARRATOR_ROLE_REGEX.is_match(&c.role))
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn primary_author(&self) -> Option<&str> {
        self.author_names().first().copied()
    }

    pub fn primary_narrator(&self) -> Option<&str> {
        self.narrator_names().first().copied()
    }

    /// Total runtime according to the spine, in seconds.
    pub fn spine_duration_secs(&self) -> f64 {
        self.spine.iter().map(|item| item.audio_duration).sum()
    }
}
