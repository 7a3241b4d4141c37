//! Parsing of yt-dlp output lines
//!
//! yt-dlp is launched with a custom `--progress-template`, so progress
//! lines have the fixed shape
//! `download-cli:<percent>% ETA:<eta> Speed:<speed> [Filename:<name>]`.
//! Everything else is free-form log output; a few of its phrases name the
//! file being written, which is the only way to learn the final filename.
//! That recovery is best effort and should be treated as advisory.

use once_cell::sync::Lazy;
use regex::Regex;

/// Prefix every progress-template line starts with
pub const PROGRESS_PREFIX: &str = "download-cli:";

/// Template handed to `--progress-template`
pub const PROGRESS_TEMPLATE: &str = "download-cli:%(progress._percent_str)s ETA:%(progress.eta)s Speed:%(progress.speed)s Filename:%(info.filename)s";

static PROGRESS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^download-cli:\s*(?P<percent>[\d.\s]+%).*?ETA:(?P<eta>\S+).*?Speed:(?P<speed>\S+)(?:.*?Filename:(?P<filename>.+))?",
    )
    .expect("valid regex")
});

static DESTINATION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(?:download|ffmpeg|ExtractAudio)\] Destination:\s*(.+)").expect("valid regex")
});

static MERGER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\[Merger\] Merging formats into\s*"?([^"]+)"?"#).expect("valid regex")
});

/// One parsed progress-template line
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressLine {
    /// Percent text as printed, e.g. `42.0%`
    pub percent_str: String,
    /// Parsed percentage, `None` if yt-dlp printed something unparsable
    pub percent: Option<f64>,
    pub eta: String,
    pub speed: String,
    pub filename: Option<String>,
}

/// Classification of a single output line
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    Progress(ProgressLine),
    /// A log line naming the file being written or merged into
    Destination(String),
    Other,
}

/// Parse a progress-template line
pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let caps = PROGRESS_LINE.captures(line.trim())?;

    let percent_str = caps.name("percent")?.as_str().trim().to_string();
    let percent = percent_str.trim_end_matches('%').trim().parse::<f64>().ok();

    Some(ProgressLine {
        percent,
        percent_str,
        eta: caps.name("eta")?.as_str().to_string(),
        speed: caps.name("speed")?.as_str().to_string(),
        filename: caps
            .name("filename")
            .map(|m| m.as_str().trim().to_string())
            .filter(|name| !name.is_empty() && name != "NA"),
    })
}

/// Extract the filename from a destination or merger log line
pub fn parse_destination(line: &str) -> Option<String> {
    DESTINATION_LINE
        .captures(line)
        .or_else(|| MERGER_LINE.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Classify one line of yt-dlp stdout
pub fn classify_line(line: &str) -> OutputLine {
    let line = line.trim();
    if line.starts_with(PROGRESS_PREFIX) {
        return parse_progress_line(line)
            .map(OutputLine::Progress)
            .unwrap_or(OutputLine::Other);
    }
    match parse_destination(line) {
        Some(name) => OutputLine::Destination(name),
        None => OutputLine::Other,
    }
}
