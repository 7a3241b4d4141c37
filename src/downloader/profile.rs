//! Quality profiles and URL-based profile suggestion

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Coarse content type a profile produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContentType {
    Audio,
    Video,
}

/// A named preset controlling the yt-dlp format selection and post-processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QualityProfile {
    pub key: &'static str,
    pub format_selector: &'static str,
    pub content_type: ContentType,
    /// Target codec for `--audio-format`, audio profiles only
    pub extract_audio_format: Option<&'static str>,
    /// Value for `--audio-quality`
    pub audio_quality: Option<&'static str>,
    pub description: &'static str,
}

pub const VIDEO_BEST_MP4: &str = "Video - Best MP4";
pub const VIDEO_1080P_MP4: &str = "Video - 1080p MP4";
pub const VIDEO_720P_MP4: &str = "Video - 720p MP4";
pub const AUDIO_BEST_MP3: &str = "Audio - Best MP3";
pub const AUDIO_BEST_M4A: &str = "Audio - Best M4A/AAC";
pub const GENERAL_BEST: &str = "General - Best Available";

pub static QUALITY_PROFILES: [QualityProfile; 6] = [
    QualityProfile {
        key: VIDEO_BEST_MP4,
        format_selector: "bestvideo[ext=mp4][vcodec^=avc1]+bestaudio[ext=m4a]/bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best",
        content_type: ContentType::Video,
        extract_audio_format: None,
        audio_quality: None,
        description: "Best MP4 (H.264) with AAC audio.",
    },
    QualityProfile {
        key: VIDEO_1080P_MP4,
        format_selector: "bestvideo[height<=1080][ext=mp4][vcodec^=avc1]+bestaudio[ext=m4a]/bestvideo[height<=1080][ext=mp4]+bestaudio[ext=m4a]/best[height<=1080][ext=mp4]",
        content_type: ContentType::Video,
        extract_audio_format: None,
        audio_quality: None,
        description: "Up to 1080p MP4 (H.264) with AAC audio.",
    },
    QualityProfile {
        key: VIDEO_720P_MP4,
        format_selector: "bestvideo[height<=720][ext=mp4][vcodec^=avc1]+bestaudio[ext=m4a]/bestvideo[height<=720][ext=mp4]+bestaudio[ext=m4a]/best[height<=720][ext=mp4]",
        content_type: ContentType::Video,
        extract_audio_format: None,
        audio_quality: None,
        description: "Up to 720p MP4 (H.264) with AAC audio.",
    },
    QualityProfile {
        key: AUDIO_BEST_MP3,
        format_selector: "bestaudio/best",
        content_type: ContentType::Audio,
        extract_audio_format: Some("mp3"),
        audio_quality: Some("0"),
        description: "Best audio, converted to MP3.",
    },
    QualityProfile {
        key: AUDIO_BEST_M4A,
        format_selector: "bestaudio[ext=m4a]/bestaudio[ext=aac]/bestaudio",
        content_type: ContentType::Audio,
        extract_audio_format: Some("m4a"),
        audio_quality: None,
        description: "Best audio in M4A (AAC).",
    },
    QualityProfile {
        key: GENERAL_BEST,
        format_selector: "bestvideo*+bestaudio*/best",
        content_type: ContentType::Video,
        extract_audio_format: None,
        audio_quality: None,
        description: "Best video and audio, any container.",
    },
];

static AUDIO_EXTENSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(mp3|m4a|aac|ogg|opus|flac|wav)(\?|$)").expect("valid regex"));
static VIDEO_EXTENSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(mp4|mkv|webm|mov|avi|flv)(\?|$)").expect("valid regex"));

const AUDIO_HOSTS: [&str; 4] = [
    "music.youtube.com",
    "spotify.com",
    "soundcloud.com",
    "deezer.com",
];
const VIDEO_HOSTS: [&str; 3] = ["youtube.com/watch", "youtu.be/", "vimeo.com/"];

/// All profile keys in display order
pub fn profile_keys() -> impl Iterator<Item = &'static str> {
    QUALITY_PROFILES.iter().map(|p| p.key)
}

/// Look up a profile by its exact key
pub fn find_profile(key: &str) -> Option<&'static QualityProfile> {
    QUALITY_PROFILES.iter().find(|p| p.key == key)
}

/// Look up a profile, falling back to the general-purpose one for unknown keys
pub fn resolve_profile(key: &str) -> &'static QualityProfile {
    find_profile(key).unwrap_or(&QUALITY_PROFILES[5])
}

pub fn is_known_profile(key: &str) -> bool {
    find_profile(key).is_some()
}

/// Pick a profile key for `url`. Rules are checked in order; the
/// caller's default wins only when nothing matches and it is a known key.
pub fn suggest_profile(url: &str, default_key: &str) -> &'static str {
    let url = url.to_lowercase();

    if AUDIO_HOSTS.iter().any(|host| url.contains(host)) || AUDIO_EXTENSION.is_match(&url) {
        return AUDIO_BEST_MP3;
    }
    if VIDEO_HOSTS.iter().any(|host| url.contains(host)) || VIDEO_EXTENSION.is_match(&url) {
        return VIDEO_1080P_MP4;
    }

    find_profile(default_key)
        .map(|p| p.key)
        .unwrap_or(QUALITY_PROFILES[0].key)
}
