pub mod ffmetadata;
pub mod ffmpeg;
pub mod naming;
pub mod openbook;
pub mod parts;
pub mod playlist;
pub mod provider;
pub mod resolve;

/// Formats a duration in seconds as `HH:MM:SS.mmm`, with trailing zero
/// millisecond digits trimmed. Hours are unbounded, not wrapped at 24.
pub fn format_duration(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let secs = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;

    let mut out = format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis);
    while out.ends_with('0') {
        out.pop();
    }
    if out.ends_with('.') {
        out.pop();
    }
    out
}

/// Duration of a segment that lies entirely within one file.
///
/// Clamps to zero (with a warning) when `end` precedes `start`; the resolver
/// never produces such a pair for a well-formed manifest.
pub fn simple_duration(start: f64, end: f64) -> f64 {
    if end < start {
        log::warn!(
            "segment end {} precedes start {}, clamping duration to 0",
            end,
            start
        );
        return 0.0;
    }
    end - start
}

/// Duration of a segment that spans a file boundary: the tail of the primary
/// file (from `start` to its end) plus the head of the next file.
pub fn complex_duration(primary_file_duration: f64, start: f64, end_in_secondary: f64) -> f64 {
    (primary_file_duration - start) + end_in_secondary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_duration_zero() {
        assert_eq!(format_duration(0.0), "00:00:00");
    }

    #[test]
    fn format_duration_trims_trailing_millis_zeros() {
        assert_eq!(format_duration(30.0), "00:00:30");
        assert_eq!(format_duration(30.5), "00:00:30.5");
        assert_eq!(format_duration(30.25), "00:00:30.25");
        assert_eq!(format_duration(30.125), "00:00:30.125");
    }

    #[test]
    fn format_duration_does_not_wrap_hours() {
        // 25 hours, 1 minute, 1.5 seconds
        assert_eq!(format_duration(25.0 * 3600.0 + 61.5), "25:01:01.5");
    }

    #[test]
    fn simple_duration_is_end_minus_start() {
        assert_eq!(simple_duration(10.0, 40.0), 30.0);
    }

    #[test]
    fn simple_duration_clamps_inverted_range() {
        assert_eq!(simple_duration(40.0, 10.0), 0.0);
    }

    #[test]
    fn complex_duration_sums_tail_and_head() {
        // 40s file, chapter starts at 35s, runs 5s into the next file
        assert_eq!(complex_duration(40.0, 35.0, 5.0), 10.0);
    }
}
