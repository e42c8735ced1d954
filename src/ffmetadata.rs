use lazy_static::lazy_static;
use regex::Regex;
use std::{io::Write, time::Duration};

use color_eyre::eyre::{self, eyre, Context};

/// Writes an `;FFMETADATA1` chapter sidecar: global tags first, then one
/// `[CHAPTER]` block per chapter with millisecond timestamps cumulative
/// from 0.
pub struct FfmetadataWriter {
    writer: Box<dyn Write>,
    header_written: bool,
}

impl FfmetadataWriter {
    pub fn new(writer: Box<dyn Write>) -> Self {
        Self {
            writer,
            header_written: false,
        }
    }

    // ffmpeg docs 22.9: Metadata keys or values containing special characters
    // (‘=’, ‘;’, ‘#’, ‘\’ and a newline) must be escaped with a backslash ‘\’.
    fn sanitize_string<T: AsRef<str>>(s: T) -> String {
        lazy_static! {
            static ref CR_REGEX: Regex = Regex::new("\r+").unwrap();
            static ref SPECIAL_CHARS_REGEX: Regex = Regex::new("[\n=;#\\\\]").unwrap();
        }

        SPECIAL_CHARS_REGEX
            .replace_all(CR_REGEX.replace_all(s.as_ref(), "").as_ref(), "\\$0")
            .trim()
            .to_string()
    }

    pub fn write_header(&mut self) -> eyre::Result<()> {
        if self.header_written {
            return Err(eyre!(
                "Failed to write ffmetadata header: header already written"
            ));
        }

        self.writer
            .write_all((format!("{}\n", ";FFMETADATA1")).as_bytes())
            .wrap_err("Failed to write ffmetadata header")?;

        self.header_written = true;

        Ok(())
    }

    /// Writes one global `key=value` tag. Tags belong between the header and
    /// the first chapter block.
    pub fn write_tag(&mut self, key: &str, value: &str) -> eyre::Result<()> {
        if !self.header_written {
            return Err(eyre!(
                "Failed to write ffmetadata tag: must write header first"
            ));
        }

        self.writer
            .write_all(
                format!(
                    "{}={}\n",
                    Self::sanitize_string(key),
                    Self::sanitize_string(value)
                )
                .as_bytes(),
            )
            .wrap_err("Failed to write ffmetadata tag")?;

        Ok(())
    }

    pub fn write_chapter(
        &mut self,
        start_time: &Duration,
        end_time: &Duration,
        title: &str,
    ) -> eyre::Result<()> {
        if !self.header_written {
            return Err(eyre!(
                "Failed to write ffmetadata chapter: must write header first"
            ));
        }

        let chapter_data = unindent::unindent(&format!(
            "
                [CHAPTER]
                TIMEBASE=1/1000
                START={}
                END={}
                title={}
            ",
            start_time.as_millis(),
            end_time.as_millis(),
            &Self::sanitize_string(title),
        ));

        self.writer
            .write_all(chapter_data.as_bytes())
            .wrap_err("Failed to write ffmetadata chapter")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn render<F>(build: F) -> String
    where
        F: FnOnce(&mut FfmetadataWriter),
    {
        let buf = SharedBuf::default();
        let mut ffm = FfmetadataWriter::new(Box::new(buf.clone()));
        build(&mut ffm);
        drop(ffm);
        let data = buf.0.lock().unwrap().clone();
        String::from_utf8(data).unwrap()
    }

    #[test]
    fn writes_header_tags_and_chapters() {
        let out = render(|ffm| {
            ffm.write_header().unwrap();
            ffm.write_tag("title", "Some Book").unwrap();
            ffm.write_tag("artist", "Jane Doe").unwrap();
            ffm.write_chapter(
                &Duration::ZERO,
                &Duration::from_millis(30_000),
                "Prologue",
            )
            .unwrap();
            ffm.write_chapter(
                &Duration::from_millis(30_000),
                &Duration::from_millis(75_500),
                "Chapter 1",
            )
            .unwrap();
        });

        assert_eq!(
            out,
            ";FFMETADATA1\n\
             title=Some Book\n\
             artist=Jane Doe\n\
             [CHAPTER]\n\
             TIMEBASE=1/1000\n\
             START=0\n\
             END=30000\n\
             title=Prologue\n\
             [CHAPTER]\n\
             TIMEBASE=1/1000\n\
             START=30000\n\
             END=75500\n\
             title=Chapter 1\n"
        );
    }

    #[test]
    fn special_characters_are_escaped() {
        let out = render(|ffm| {
            ffm.write_header().unwrap();
            ffm.write_chapter(
                &Duration::ZERO,
                &Duration::from_millis(1000),
                "A = B; #1",
            )
            .unwrap();
        });
        assert!(out.contains(r"title=A \= B\; \#1"));
    }

    #[test]
    fn header_must_come_first() {
        let mut ffm = FfmetadataWriter::new(Box::new(Vec::<u8>::new()));
        assert!(ffm.write_tag("title", "x").is_err());
        assert!(ffm
            .write_chapter(&Duration::ZERO, &Duration::ZERO, "x")
            .is_err());
        ffm.write_header().unwrap();
        assert!(ffm.write_header().is_err());
    }
}
