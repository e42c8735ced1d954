use std::{fmt::Write as _, fs, path::Path};

use color_eyre::eyre::{self, Context};

/// Extended M3U playlist for the per-chapter output files.
#[derive(Debug, Clone, Default)]
pub struct Playlist {
    pub title: String,
    pub author: String,
    pub book_title: String,
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, Default)]
pub struct Track {
    pub title: String,
    pub duration_secs: f64,
    pub file_name: String,
}

impl Track {
    fn length_secs(&self) -> u64 {
        self.duration_secs.round() as u64
    }

    fn length_ms(&self) -> u64 {
        (self.duration_secs * 1000.0).round() as u64
    }
}

impl Playlist {
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("#EXTM3U\n");
        let _ = writeln!(out, "#PLAYLIST: {}", self.title);
        let _ = writeln!(out, "#EXTART: {}", self.author);
        let _ = writeln!(out, "#EXTALB: {}", self.book_title);
        for track in &self.tracks {
            let _ = writeln!(
                out,
                "#EXTINF:{} ms={},{}",
                track.length_secs(),
                track.length_ms(),
                track.title
            );
            out.push_str(&track.file_name);
            out.push('\n');
        }
        out
    }

    pub fn write_file(&self, path: &Path) -> eyre::Result<()> {
        fs::write(path, self.render())
            .wrap_err_with(|| format!("failed to write playlist {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_headers_and_tracks() {
        let playlist = Playlist {
            title: "Some Book".into(),
            author: "Jane Doe".into(),
            book_title: "Some Book".into(),
            tracks: vec![
                Track {
                    title: "Prologue".into(),
                    duration_secs: 30.5,
                    file_name: "[00]. Prologue.mp3".into(),
                },
                Track {
                    title: "Chapter 1".into(),
                    duration_secs: 120.0,
                    file_name: "[01]. Chapter 1.mp3".into(),
                },
            ],
        };

        assert_eq!(
            playlist.render(),
            "#EXTM3U\n\
             #PLAYLIST: Some Book\n\
             #EXTART: Jane Doe\n\
             #EXTALB: Some Book\n\
             #EXTINF:31 ms=30500,Prologue\n\
             [00]. Prologue.mp3\n\
             #EXTINF:120 ms=120000,Chapter 1\n\
             [01]. Chapter 1.mp3\n"
        );
    }

    #[test]
    fn renders_without_tracks() {
        let playlist = Playlist {
            title: "T".into(),
            ..Default::default()
        };
        assert!(playlist.render().starts_with("#EXTM3U\n#PLAYLIST: T\n"));
    }
}
