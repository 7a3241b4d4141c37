//! yt-dlp command line construction and tool discovery

use crate::downloader::profile::{ContentType, QualityProfile};
use crate::downloader::progress::PROGRESS_TEMPLATE;
use crate::utils::config::AppSettings;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the downloader binary when it has to be resolved through PATH
pub const YT_DLP_EXECUTABLE: &str = "yt-dlp";
pub const FFMPEG_EXECUTABLE: &str = "ffmpeg";

/// Output template relative to the task's output directory
const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// How to launch yt-dlp: a program plus arguments that go before the URL,
/// so `python -m yt_dlp` works as well as a plain binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub leading_args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Locate yt-dlp. When nothing is found the bare executable name is
    /// returned so the failure surfaces per task as a missing tool.
    pub fn locate() -> Self {
        match find_ytdlp() {
            Some(path) => Self::new(path),
            None => {
                warn!("yt-dlp not found, falling back to PATH lookup at launch time");
                Self::new(YT_DLP_EXECUTABLE)
            }
        }
    }
}

impl Default for ToolCommand {
    fn default() -> Self {
        Self::new(YT_DLP_EXECUTABLE)
    }
}

/// Settings-driven toggles that shape the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    pub embed_thumbnail_audio: bool,
    pub add_metadata_video: bool,
    pub prefer_hw_acceleration: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            embed_thumbnail_audio: true,
            add_metadata_video: true,
            prefer_hw_acceleration: false,
        }
    }
}

impl From<&AppSettings> for DownloadOptions {
    fn from(settings: &AppSettings) -> Self {
        Self {
            embed_thumbnail_audio: settings.embed_thumbnail_audio,
            add_metadata_video: settings.add_metadata_video,
            prefer_hw_acceleration: settings.prefer_hw_acceleration,
        }
    }
}

/// Build the yt-dlp arguments for one download (everything after the leading args)
pub fn build_download_args(
    url: &str,
    profile: &QualityProfile,
    output_dir: &Path,
    options: &DownloadOptions,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        url.into(),
        "--no-check-certificates".into(),
        "--no-mtime".into(),
        "--ignore-errors".into(),
        "--retries".into(),
        "2".into(),
        "--fragment-retries".into(),
        "2".into(),
        "--newline".into(),
        "--output".into(),
        output_dir.join(OUTPUT_TEMPLATE).into_os_string(),
        "--format".into(),
        profile.format_selector.into(),
        "--progress-template".into(),
        PROGRESS_TEMPLATE.into(),
    ];

    match profile.content_type {
        ContentType::Audio => {
            args.push("--extract-audio".into());
            args.push("--audio-format".into());
            args.push(profile.extract_audio_format.unwrap_or("mp3").into());
            if let Some(quality) = profile.audio_quality {
                args.push("--audio-quality".into());
                args.push(quality.into());
            }
            if options.embed_thumbnail_audio {
                args.push("--embed-thumbnail".into());
            }
        }
        ContentType::Video => {
            args.push("--merge-output-format".into());
            args.push("mp4".into());
            if options.add_metadata_video {
                args.push("--add-metadata".into());
            }
        }
    }

    if options.prefer_hw_acceleration {
        args.push("--postprocessor-args".into());
        args.push("ffmpeg_i:-hwaccel auto".into());
    }

    args
}

/// Render a command line for logging
pub fn display_command(tool: &ToolCommand, args: &[OsString]) -> String {
    std::iter::once(tool.program.as_os_str())
        .chain(tool.leading_args.iter().map(OsString::as_os_str))
        .chain(args.iter().map(OsString::as_os_str))
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================
// yt-dlp Detection Functions
// ============================================================

/// Find yt-dlp binary with priority:
/// 1. Next to the current executable
/// 2. System PATH
/// 3. Common installation paths
pub fn find_ytdlp() -> Option<PathBuf> {
    if let Some(bundled) = find_bundled_ytdlp() {
        info!("Using bundled yt-dlp: {:?}", bundled);
        return Some(bundled);
    }

    if let Ok(system) = which::which(YT_DLP_EXECUTABLE) {
        info!("Using system yt-dlp: {:?}", system);
        return Some(system);
    }

    if let Some(common) = find_in_common_paths() {
        info!("Using yt-dlp from common path: {:?}", common);
        return Some(common);
    }

    None
}

fn find_bundled_ytdlp() -> Option<PathBuf> {
    let exe_path = std::env::current_exe().ok()?;
    let exe_dir = exe_path.parent()?;
    let name = if cfg!(windows) { "yt-dlp.exe" } else { YT_DLP_EXECUTABLE };
    let candidate = exe_dir.join(name);
    debug!("Checking bundled path: {:?}", candidate);

    (candidate.is_file() && is_executable(&candidate)).then_some(candidate)
}

fn find_in_common_paths() -> Option<PathBuf> {
    let mut candidates = vec![
        PathBuf::from("/opt/homebrew/bin/yt-dlp"),
        PathBuf::from("/usr/local/bin/yt-dlp"),
        PathBuf::from("/usr/bin/yt-dlp"),
    ];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".local").join("bin").join("yt-dlp"));
    }

    candidates
        .into_iter()
        .find(|path| path.is_file() && is_executable(path))
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        std::fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::profile::{
        resolve_profile, AUDIO_BEST_M4A, AUDIO_BEST_MP3, VIDEO_720P_MP4,
    };

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    fn value_after(args: &[String], flag: &str) -> Option<String> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .cloned()
    }

    #[test]
    fn test_common_flags_and_url_first() {
        let args = strings(&build_download_args(
            "https://example.com/v",
            resolve_profile(VIDEO_720P_MP4),
            Path::new("/tmp/out"),
            &DownloadOptions::default(),
        ));
        assert_eq!(args[0], "https://example.com/v");
        for flag in ["--no-check-certificates", "--no-mtime", "--ignore-errors", "--newline"] {
            assert!(args.contains(&flag.to_string()), "missing {flag}");
        }
        assert_eq!(value_after(&args, "--retries").as_deref(), Some("2"));
        assert_eq!(value_after(&args, "--fragment-retries").as_deref(), Some("2"));
        assert_eq!(
            value_after(&args, "--progress-template").as_deref(),
            Some(PROGRESS_TEMPLATE)
        );
        let output = value_after(&args, "--output").unwrap();
        assert!(output.starts_with("/tmp/out"));
        assert!(output.ends_with("%(title)s.%(ext)s"));
    }

    #[test]
    fn test_video_profile_flags() {
        let profile = resolve_profile(VIDEO_720P_MP4);
        let args = strings(&build_download_args(
            "u",
            profile,
            Path::new("/o"),
            &DownloadOptions::default(),
        ));
        assert_eq!(value_after(&args, "--format").as_deref(), Some(profile.format_selector));
        assert_eq!(value_after(&args, "--merge-output-format").as_deref(), Some("mp4"));
        assert!(args.contains(&"--add-metadata".to_string()));
        assert!(!args.contains(&"--extract-audio".to_string()));
    }

    #[test]
    fn test_video_without_metadata() {
        let options = DownloadOptions {
            add_metadata_video: false,
            ..Default::default()
        };
        let args = strings(&build_download_args(
            "u",
            resolve_profile(VIDEO_720P_MP4),
            Path::new("/o"),
            &options,
        ));
        assert!(!args.contains(&"--add-metadata".to_string()));
    }

    #[test]
    fn test_audio_profile_flags() {
        let args = strings(&build_download_args(
            "u",
            resolve_profile(AUDIO_BEST_MP3),
            Path::new("/o"),
            &DownloadOptions::default(),
        ));
        assert!(args.contains(&"--extract-audio".to_string()));
        assert_eq!(value_after(&args, "--audio-format").as_deref(), Some("mp3"));
        assert_eq!(value_after(&args, "--audio-quality").as_deref(), Some("0"));
        assert!(args.contains(&"--embed-thumbnail".to_string()));
        assert!(!args.contains(&"--merge-output-format".to_string()));
    }

    #[test]
    fn test_m4a_has_no_audio_quality_and_respects_thumbnail_toggle() {
        let options = DownloadOptions {
            embed_thumbnail_audio: false,
            ..Default::default()
        };
        let args = strings(&build_download_args(
            "u",
            resolve_profile(AUDIO_BEST_M4A),
            Path::new("/o"),
            &options,
        ));
        assert_eq!(value_after(&args, "--audio-format").as_deref(), Some("m4a"));
        assert!(!args.contains(&"--audio-quality".to_string()));
        assert!(!args.contains(&"--embed-thumbnail".to_string()));
    }

    #[test]
    fn test_hw_acceleration_flag() {
        let options = DownloadOptions {
            prefer_hw_acceleration: true,
            ..Default::default()
        };
        let args = strings(&build_download_args(
            "u",
            resolve_profile(VIDEO_720P_MP4),
            Path::new("/o"),
            &options,
        ));
        assert_eq!(
            value_after(&args, "--postprocessor-args").as_deref(),
            Some("ffmpeg_i:-hwaccel auto")
        );
    }

    #[test]
    fn test_display_command_includes_leading_args() {
        let tool = ToolCommand::new("python3").with_leading_args(["-m", "yt_dlp"]);
        let rendered = display_command(&tool, &["https://x".into()]);
        assert_eq!(rendered, "python3 -m yt_dlp https://x");
    }

    #[test]
    fn test_locate_always_yields_a_program() {
        let tool = ToolCommand::locate();
        assert!(!tool.program.as_os_str().is_empty());
    }

    #[test]
    fn test_is_executable() {
        let path = PathBuf::from("/bin/sh");
        if path.exists() {
            assert!(is_executable(&path));
        }
    }
}
