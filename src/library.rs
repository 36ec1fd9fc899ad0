//! Local library module
//!
//! This module owns the on-disk layout of downloaded episodes. The file name
//! of an episode is the only record that it was downloaded, so formatting and
//! parsing of that name live side by side here.
//!
//! Layout: `<root>/<folder>[/<season folder> <N>]/<name>_s<NN>e<NN>.<ext>`,
//! or `<name>_e<NN>.<ext>` for series without seasons.

use crate::config::SeriesEntry;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

/// Marker carried by files that are still being written
pub const IN_PROGRESS_SUFFIX: &str = ".part";

/// Resume state the extractor keeps next to an unfinished download
const EXTRACTOR_STATE_SUFFIX: &str = ".ytdl";

/// Container every strategy produces
pub const EPISODE_EXTENSION: &str = "mp4";

static SEASON_EPISODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_s\d+e(\d+)\.[A-Za-z0-9]+$").expect("valid pattern"));

static BARE_EPISODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_e(\d+)\.[A-Za-z0-9]+$").expect("valid pattern"));

/// Sanitizes a series name for use in file names
///
/// Drops characters that are invalid or problematic in paths across platforms
/// (path separators, reserved characters, control characters), replaces
/// whitespace with underscores and trims leading/trailing dots and underscores.
pub fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .filter(|c| !c.is_control())
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();

    sanitized.trim_matches(|c: char| c == '_' || c == '.').to_string()
}

/// Formats the final file name of an episode
///
/// ```
/// use saturno::episode_filename;
///
/// assert_eq!(episode_filename("Made in Abyss", Some(1), 3, "mp4"), "Made_in_Abyss_s01e03.mp4");
/// assert_eq!(episode_filename("Dororo", None, 12, "mp4"), "Dororo_e12.mp4");
/// ```
pub fn episode_filename(name: &str, season: Option<u32>, episode: u32, extension: &str) -> String {
    let name = sanitize_name(name);
    match season {
        Some(season) => format!("{name}_s{season:02}e{episode:02}.{extension}"),
        None => format!("{name}_e{episode:02}.{extension}"),
    }
}

/// Parses the episode number back out of a file name
///
/// Returns `None` for names that do not follow the layout for the given
/// season setting, and for files that are still in progress.
pub fn parse_episode_number(filename: &str, seasonal: bool) -> Option<u32> {
    if is_in_progress(filename) {
        return None;
    }

    let pattern = if seasonal {
        &SEASON_EPISODE_PATTERN
    } else {
        &BARE_EPISODE_PATTERN
    };

    pattern
        .captures(filename)
        .and_then(|captures| captures.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Whether a file name belongs to an unfinished download
///
/// Only the end of the name counts; series names may contain `.part`.
pub fn is_in_progress(filename: &str) -> bool {
    filename.ends_with(IN_PROGRESS_SUFFIX) || filename.ends_with(EXTRACTOR_STATE_SUFFIX)
}

/// Paths of one series inside the local library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesLayout {
    directory: PathBuf,
    name: String,
    season: Option<u32>,
}

impl SeriesLayout {
    /// Builds the layout of a series below the output root
    pub fn new(root: &Path, season_folder: &str, entry: &SeriesEntry) -> Self {
        let mut directory = root.join(&entry.folder);
        if let Some(season) = entry.season {
            directory.push(format!("{season_folder} {season}"));
        }

        Self {
            directory,
            name: entry.name.clone(),
            season: entry.season,
        }
    }

    /// Folder holding the episodes of this series
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Final destination of an episode
    pub fn episode_path(&self, episode: u32) -> PathBuf {
        self.directory.join(episode_filename(
            &self.name,
            self.season,
            episode,
            EPISODE_EXTENSION,
        ))
    }

    /// Reconstructs the set of episodes already present on disk
    ///
    /// A missing folder means nothing was downloaded yet. Files that are
    /// still in progress, and files that do not follow the naming layout,
    /// are ignored. The scan has no side effects.
    pub fn downloaded_episodes(&self) -> io::Result<BTreeSet<u32>> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e),
        };

        let seasonal = self.season.is_some();
        let mut episodes = BTreeSet::new();

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };

            match parse_episode_number(file_name, seasonal) {
                Some(episode) => {
                    episodes.insert(episode);
                }
                None => debug!(file = file_name, "ignoring file outside naming layout"),
            }
        }

        Ok(episodes)
    }
}
