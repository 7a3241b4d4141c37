//! Application settings and their JSON store

use crate::downloader::profile::{is_known_profile, VIDEO_1080P_MP4};
use crate::utils::error::PhoenixError;
use crate::utils::paths;
use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Download location
    pub output_directory: PathBuf,

    /// Quality profile used when a URL matches no rule
    pub default_quality: String,

    /// Maximum concurrent downloads
    pub max_concurrent_downloads: usize,

    pub prefer_hw_acceleration: bool,
    pub embed_thumbnail_audio: bool,
    pub add_metadata_video: bool,

    // Presentation settings, kept so the file round-trips
    pub theme: String,
    pub appearance_mode: String,
    pub window_geometry: String,
    pub ask_open_folder: bool,
    pub auto_paste_clipboard: bool,

    /// Keys this version does not know about
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            output_directory: paths::default_output_dir(),
            default_quality: VIDEO_1080P_MP4.to_string(),
            max_concurrent_downloads: 1,
            prefer_hw_acceleration: false,
            embed_thumbnail_audio: true,
            add_metadata_video: true,
            theme: "blue".to_string(),
            appearance_mode: "dark".to_string(),
            window_geometry: "1280x780".to_string(),
            ask_open_folder: true,
            auto_paste_clipboard: false,
            extra: Map::new(),
        }
    }
}

/// Names of every key `AppSettings` writes itself
const KNOWN_KEYS: [&str; 11] = [
    "output_directory",
    "default_quality",
    "max_concurrent_downloads",
    "prefer_hw_acceleration",
    "embed_thumbnail_audio",
    "add_metadata_video",
    "theme",
    "appearance_mode",
    "window_geometry",
    "ask_open_folder",
    "auto_paste_clipboard",
];

/// Loads and saves `AppSettings` as pretty-printed JSON
#[derive(Debug, Clone)]
pub struct SettingsStore {
    config_dir: PathBuf,
    file_path: PathBuf,
}

impl SettingsStore {
    /// Store in the standard per-user config directory
    pub fn open_default() -> Self {
        Self::new(paths::config_dir())
    }

    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        let file_path = config_dir.join(paths::SETTINGS_FILE_NAME);
        Self {
            config_dir,
            file_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Where downloads go when the configured directory cannot be created
    pub fn fallback_output_dir(&self) -> PathBuf {
        self.config_dir.join("Downloads_Fallback_Safe")
    }

    /// Load settings, repairing the file when needed.
    ///
    /// A missing or unreadable file is replaced by defaults; keys missing
    /// from an older file are filled in and written back.
    pub fn load(&self) -> AppSettings {
        if let Err(e) = fs::create_dir_all(&self.config_dir) {
            error!("Failed to create config dir {:?}: {}", self.config_dir, e);
        }

        if !self.file_path.exists() {
            info!("Settings file {:?} missing, creating defaults", self.file_path);
            return self.reset_to_defaults();
        }

        let parsed = fs::read_to_string(&self.file_path)
            .map_err(PhoenixError::from)
            .and_then(|content| serde_json::from_str::<Value>(&content).map_err(PhoenixError::from))
            .and_then(|value| {
                let missing_keys = missing_keys(&value);
                let settings = serde_json::from_value::<AppSettings>(value)?;
                Ok((settings, missing_keys))
            });

        match parsed {
            Ok((mut settings, missing_keys)) => {
                let mut changed = missing_keys;
                changed |= self.normalize(&mut settings);
                if changed {
                    self.write_logged(&settings);
                }
                settings
            }
            Err(e) => {
                error!("Failed to read settings {:?}: {}. Using defaults", self.file_path, e);
                self.reset_to_defaults()
            }
        }
    }

    /// Normalize and persist settings
    pub fn save(&self, settings: &mut AppSettings) -> Result<(), PhoenixError> {
        self.normalize(settings);
        self.write(settings)
    }

    fn reset_to_defaults(&self) -> AppSettings {
        let mut settings = AppSettings::default();
        self.normalize(&mut settings);
        self.write_logged(&settings);
        settings
    }

    /// Make the output directory absolute and existing, clamp numbers and
    /// drop unknown profile names. Returns whether anything changed.
    fn normalize(&self, settings: &mut AppSettings) -> bool {
        let mut changed = false;

        if let Ok(absolute) = settings.output_directory.absolutize() {
            if *absolute != *settings.output_directory {
                warn!(
                    "Output directory {:?} is not absolute, converting",
                    settings.output_directory
                );
                settings.output_directory = absolute.into_owned();
                changed = true;
            }
        }

        if !settings.output_directory.is_dir() {
            info!("Creating output directory {:?}", settings.output_directory);
            if let Err(e) = fs::create_dir_all(&settings.output_directory) {
                let fallback = self.fallback_output_dir();
                error!(
                    "Cannot create output directory {:?}: {}. Using fallback {:?}",
                    settings.output_directory, e, fallback
                );
                if let Err(e) = fs::create_dir_all(&fallback) {
                    error!("Cannot create fallback directory {:?}: {}", fallback, e);
                }
                settings.output_directory = fallback;
                changed = true;
            }
        }

        if settings.max_concurrent_downloads == 0 {
            settings.max_concurrent_downloads = 1;
            changed = true;
        }

        if !is_known_profile(&settings.default_quality) {
            warn!("Unknown default quality {:?}, resetting", settings.default_quality);
            settings.default_quality = VIDEO_1080P_MP4.to_string();
            changed = true;
        }

        changed
    }

    fn write(&self, settings: &AppSettings) -> Result<(), PhoenixError> {
        fs::create_dir_all(&self.config_dir)?;
        let json = serde_json::to_string_pretty(settings)?;
        fs::write(&self.file_path, json)?;
        info!("Settings saved to {:?}", self.file_path);
        Ok(())
    }

    fn write_logged(&self, settings: &AppSettings) {
        if let Err(e) = self.write(settings) {
            error!("Failed to save settings to {:?}: {}", self.file_path, e);
        }
    }
}

fn missing_keys(value: &Value) -> bool {
    match value.as_object() {
        Some(map) => KNOWN_KEYS.iter().any(|key| !map.contains_key(*key)),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with_output(temp: &TempDir) -> (SettingsStore, PathBuf) {
        let store = SettingsStore::new(temp.path().join("config"));
        let output = temp.path().join("downloads");
        (store, output)
    }

    #[test]
    fn test_default_config() {
        let config = AppSettings::default();
        assert_eq!(config.max_concurrent_downloads, 1);
        assert_eq!(config.default_quality, VIDEO_1080P_MP4);
        assert!(config.embed_thumbnail_audio);
        assert!(config.add_metadata_video);
        assert!(!config.prefer_hw_acceleration);
    }

    #[test]
    fn test_missing_file_writes_defaults() {
        let temp = TempDir::new().unwrap();
        let store = SettingsStore::new(temp.path().join("config"));
        let settings = store.load();
        assert!(store.path().exists());
        assert_eq!(settings.max_concurrent_downloads, 1);
        assert!(settings.output_directory.is_absolute());
    }

    #[test]
    fn test_save_then_load_keeps_values_and_unknown_keys() {
        let temp = TempDir::new().unwrap();
        let (store, output) = store_with_output(&temp);

        let mut settings = AppSettings {
            output_directory: output.clone(),
            max_concurrent_downloads: 3,
            prefer_hw_acceleration: true,
            ..Default::default()
        };
        settings
            .extra
            .insert("sidebar_width".to_string(), Value::from(240));
        store.save(&mut settings).unwrap();
        assert!(output.is_dir(), "save creates the output directory");

        let loaded = store.load();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.extra.get("sidebar_width"), Some(&Value::from(240)));
    }

    #[test]
    fn test_partial_file_is_filled_and_rewritten() {
        let temp = TempDir::new().unwrap();
        let (store, output) = store_with_output(&temp);
        fs::create_dir_all(temp.path().join("config")).unwrap();
        let partial = serde_json::json!({
            "output_directory": output,
            "max_concurrent_downloads": 4
        });
        fs::write(store.path(), partial.to_string()).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.max_concurrent_downloads, 4);
        assert!(loaded.add_metadata_video);

        let raw = fs::read_to_string(store.path()).unwrap();
        let on_disk: Value = serde_json::from_str(&raw).unwrap();
        assert!(!missing_keys(&on_disk));
    }

    #[test]
    fn test_malformed_file_resets_to_defaults() {
        let temp = TempDir::new().unwrap();
        let store = SettingsStore::new(temp.path().join("config"));
        fs::create_dir_all(temp.path().join("config")).unwrap();
        fs::write(store.path(), "{ not json").unwrap();

        let loaded = store.load();
        assert_eq!(loaded.max_concurrent_downloads, 1);
        let content = fs::read_to_string(store.path()).unwrap();
        assert!(serde_json::from_str::<Value>(&content).is_ok());
    }

    #[test]
    fn test_zero_concurrency_and_unknown_profile_are_repaired() {
        let temp = TempDir::new().unwrap();
        let (store, output) = store_with_output(&temp);
        let mut settings = AppSettings {
            output_directory: output,
            max_concurrent_downloads: 0,
            default_quality: "Ultra 16K".to_string(),
            ..Default::default()
        };
        store.save(&mut settings).unwrap();
        assert_eq!(settings.max_concurrent_downloads, 1);
        assert_eq!(settings.default_quality, VIDEO_1080P_MP4);
    }

    #[cfg(unix)]
    #[test]
    fn test_uncreatable_output_dir_uses_fallback() {
        let temp = TempDir::new().unwrap();
        let store = SettingsStore::new(temp.path().join("config"));
        // a regular file where a parent directory should be
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, b"").unwrap();

        let mut settings = AppSettings {
            output_directory: blocker.join("downloads"),
            ..Default::default()
        };
        store.save(&mut settings).unwrap();
        assert_eq!(settings.output_directory, store.fallback_output_dir());
        assert!(store.fallback_output_dir().is_dir());
    }
}
