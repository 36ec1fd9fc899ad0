//! Configuration module
//!
//! This module loads the series list and run settings from a JSON file stored
//! in the system's standard configuration directory. The key names are kept
//! compatible with configuration files written by earlier releases.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default name of the per-season subfolder (`Season 1`, `Season 2`, ...)
const DEFAULT_SEASON_FOLDER: &str = "Season";

/// Default upper bound for a single episode (resolution + every download attempt)
const DEFAULT_EPISODE_TIMEOUT_SECS: u64 = 60 * 60;

/// Default timeout for fetching a single catalog or detail page
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Errors that can occur while loading the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to determine configuration directory location
    #[error("Failed to determine configuration directory location")]
    ConfigDirectoryNotFound,

    /// No configuration file at the expected location
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    /// Failed to read the configuration file
    #[error("Failed to read configuration file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse the configuration file
    #[error("Failed to parse configuration file {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A value in the configuration is unusable
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The library root does not exist or is not a directory
    #[error("Library root is not an existing directory: {0}")]
    OutputRootMissing(PathBuf),
}

/// How a series decides which remote episodes are missing locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Backfill every remote episode that is absent locally
    Full,
    /// Only fetch episodes numbered above the highest local one
    #[serde(alias = "new")]
    Incremental,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Full => write!(f, "full"),
            SyncMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// A series the user asked to keep in sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesEntry {
    /// Display name, also used to build file names
    pub name: String,
    /// Catalog page listing every episode of the series
    #[serde(rename = "site")]
    pub catalog_url: String,
    /// Season label, absent for series without seasons
    #[serde(default, deserialize_with = "deserialize_season")]
    pub season: Option<u32>,
    /// Folder below the output root, unique across entries
    pub folder: String,
    /// Sync policy for this series
    pub mode: SyncMode,
}

/// Complete run configuration
///
/// Built once at startup and handed to every component that needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Root of the local library
    #[serde(rename = "path")]
    pub output_root: PathBuf,

    /// Series to keep in sync
    #[serde(rename = "anime", default)]
    pub series: Vec<SeriesEntry>,

    /// Telegram bot token used for completion notices
    #[serde(default)]
    pub telegram_bot_token: Option<String>,

    /// Telegram chat receiving completion notices
    #[serde(default, deserialize_with = "deserialize_chat_id")]
    pub telegram_chat_id: Option<String>,

    /// General-purpose extractor used as download fallback
    #[serde(rename = "youtube-dl-path", default = "default_extractor")]
    pub extractor_path: PathBuf,

    /// ffmpeg binary used to remux segmented streams
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: PathBuf,

    /// Name of the per-season subfolder
    #[serde(default = "default_season_folder")]
    pub season_folder: String,

    /// Per-episode timeout in seconds
    #[serde(rename = "episode-timeout", default = "default_episode_timeout")]
    pub episode_timeout_secs: u64,

    /// Per-page request timeout in seconds
    #[serde(rename = "request-timeout", default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_extractor() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_season_folder() -> String {
    DEFAULT_SEASON_FOLDER.to_string()
}

fn default_episode_timeout() -> u64 {
    DEFAULT_EPISODE_TIMEOUT_SECS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Seasons were historically stored as strings ("1"), newer files use numbers
fn deserialize_season<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid season: {s:?}"))),
    }
}

/// Telegram chat ids are numeric but were often saved as strings
fn deserialize_chat_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => None,
        Some(Raw::Number(n)) => Some(n.to_string()),
        Some(Raw::Text(s)) if s.trim().is_empty() => None,
        Some(Raw::Text(s)) => Some(s.trim().to_string()),
    })
}

impl Config {
    /// Loads the configuration from the given path, or from the default
    /// location when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };

        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFailed {
            path: path.clone(),
            source: e,
        })?;

        Self::from_json(&content).map_err(|e| match e {
            ConfigError::ParseFailed { source, .. } => ConfigError::ParseFailed { path, source },
            other => other,
        })
    }

    /// Parses and validates a configuration from its JSON text
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_json::from_str(content).map_err(|e| ConfigError::ParseFailed {
                path: PathBuf::new(),
                source: e,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the pipeline relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("output path is empty".to_string()));
        }

        let mut folders = HashSet::new();
        for entry in &self.series {
            if entry.folder.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "series '{}' has an empty folder name",
                    entry.name
                )));
            }
            if !folders.insert(entry.folder.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "folder '{}' is used by more than one series",
                    entry.folder
                )));
            }
        }

        if self.episode_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".to_string()));
        }

        Ok(())
    }

    /// Replaces the library root and validates the result
    pub fn with_output_root(mut self, output_root: PathBuf) -> Result<Self, ConfigError> {
        self.output_root = output_root;
        self.validate()?;
        Ok(self)
    }

    /// Fails unless the library root is an existing directory
    ///
    /// The root is never created implicitly; a missing root usually means an
    /// unmounted drive.
    pub fn check_output_root(&self) -> Result<(), ConfigError> {
        if self.output_root.is_dir() {
            Ok(())
        } else {
            Err(ConfigError::OutputRootMissing(self.output_root.clone()))
        }
    }

    /// Bot token and chat id, only when both are present
    pub fn telegram_credentials(&self) -> Option<(&str, &str)> {
        match (&self.telegram_bot_token, &self.telegram_chat_id) {
            (Some(token), Some(chat)) if !token.is_empty() => Some((token, chat)),
            _ => None,
        }
    }

    pub fn episode_timeout(&self) -> Duration {
        Duration::from_secs(self.episode_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Gets the default configuration file path
///
/// Returns the platform-specific configuration path:
/// - Linux: ~/.config/saturno/config.json
/// - macOS: ~/Library/Application Support/it.mortafix.saturno/config.json
/// - Windows: %APPDATA%\mortafix\saturno\config\config.json
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let proj_dirs = directories::ProjectDirs::from("it", "mortafix", "saturno")
        .ok_or(ConfigError::ConfigDirectoryNotFound)?;

    Ok(proj_dirs.config_dir().join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY_CONFIG: &str = r#"{
        "path": "/media/anime",
        "anime": [
            {"name": "Made in Abyss", "site": "https://example.org/anime/made-in-abyss", "season": "1", "folder": "MadeInAbyss", "mode": "full"},
            {"name": "Dororo", "site": "https://example.org/anime/dororo", "season": 2, "folder": "Dororo", "mode": "new"}
        ],
        "telegram-bot-token": "123:abc",
        "telegram-chat-id": 424242,
        "youtube-dl-path": "/usr/local/bin/youtube-dl",
        "colors": {"action-download": "green"}
    }"#;

    #[test]
    fn test_parse_legacy_config() {
        let config = Config::from_json(LEGACY_CONFIG).unwrap();

        assert_eq!(config.output_root, PathBuf::from("/media/anime"));
        assert_eq!(config.series.len(), 2);
        assert_eq!(config.series[0].season, Some(1));
        assert_eq!(config.series[0].mode, SyncMode::Full);
        assert_eq!(config.series[1].season, Some(2));
        assert_eq!(config.series[1].mode, SyncMode::Incremental);
        assert_eq!(config.extractor_path, PathBuf::from("/usr/local/bin/youtube-dl"));
        assert_eq!(config.telegram_credentials(), Some(("123:abc", "424242")));
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_json(r#"{"path": "/tmp/library"}"#).unwrap();

        assert!(config.series.is_empty());
        assert_eq!(config.extractor_path, PathBuf::from("yt-dlp"));
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.season_folder, "Season");
        assert_eq!(config.episode_timeout(), Duration::from_secs(3600));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.telegram_credentials(), None);
    }

    #[test]
    fn test_missing_season_is_none() {
        let config = Config::from_json(
            r#"{"path": "/x", "anime": [{"name": "A", "site": "u", "folder": "a", "mode": "incremental"}]}"#,
        )
        .unwrap();
        assert_eq!(config.series[0].season, None);
    }

    #[test]
    fn test_duplicate_folder_rejected() {
        let result = Config::from_json(
            r#"{"path": "/x", "anime": [
                {"name": "A", "site": "u", "folder": "same", "mode": "full"},
                {"name": "B", "site": "v", "folder": "same", "mode": "full"}
            ]}"#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_empty_output_root_rejected() {
        let result = Config::from_json(r#"{"path": ""}"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_output_override_is_validated() {
        let config = Config::from_json(r#"{"path": "/media/anime"}"#).unwrap();

        let result = config.clone().with_output_root(PathBuf::new());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let config = config.with_output_root(PathBuf::from("/mnt/library")).unwrap();
        assert_eq!(config.output_root, PathBuf::from("/mnt/library"));
    }

    #[test]
    fn test_output_root_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("library");
        let config = Config::from_json(r#"{"path": "/placeholder"}"#)
            .unwrap()
            .with_output_root(root.clone())
            .unwrap();

        assert!(matches!(
            config.check_output_root(),
            Err(ConfigError::OutputRootMissing(path)) if path == root
        ));

        fs::write(&root, b"not a directory").unwrap();
        assert!(config.check_output_root().is_err());

        fs::remove_file(&root).unwrap();
        fs::create_dir(&root).unwrap();
        assert!(config.check_output_root().is_ok());
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load(Some(Path::new("/nonexistent/saturno/config.json")));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        match Config::load(Some(&path)) {
            Err(ConfigError::ParseFailed { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
