//! Saturno - Keep a local library of episodic series in sync
//!
//! This library reads a list of tracked series, works out which episodes are
//! available remotely but missing locally, and downloads them with whichever
//! transfer the source requires. Local state is reconstructed from file names
//! on every run; there is no download ledger.

mod config;
mod download;
mod library;
mod notify;
mod planner;
mod source;
mod staging;

use library::SeriesLayout;
use source::{EpisodeLocator, fetch_episode_index, resolve_media};
use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, info, warn};

// Re-export error types
pub use config::ConfigError;
pub use download::{DownloadError, TransportError};
pub use notify::NotifyError;
pub use source::{ExtractionError, FetchError};

// Re-export the building blocks of a run
pub use config::{Config, SeriesEntry, SyncMode, default_config_path};
pub use download::{
    Deadline, DownloadEngine, DownloadEvent, ExtractorStrategy, ProgressiveStrategy, RemuxStrategy,
    Strategy, TransferProgress,
};
pub use library::{episode_filename, parse_episode_number, sanitize_name};
pub use notify::{EpisodeNotice, NoopNotifier, Notifier, TelegramNotifier, format_message};
pub use planner::{SyncPlan, plan_delta, plan_sync};
pub use source::{Delivery, HttpFetcher, PageFetcher, ResolvedMedia};

/// What a run does with the planned episodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Download planned episodes
    Run,
    /// Only report planned episodes
    DryRun,
}

/// Progress event emitted during a run
///
/// These events allow library users to render status lines, or to stay
/// silent.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Work on a series begins
    SeriesStarted {
        name: String,
        folder: String,
        mode: SyncMode,
    },

    /// The series could not be processed at all
    SeriesFailed { name: String, reason: String },

    /// Delta between remote and local episodes computed
    EpisodesPlanned {
        name: String,
        local_count: usize,
        to_fetch: Vec<u32>,
        deferred: Vec<u32>,
    },

    /// An episode would be downloaded (dry run only)
    EpisodeFound {
        name: String,
        season: Option<u32>,
        episode: u32,
        destination: PathBuf,
    },

    /// An episode download begins
    EpisodeStarted {
        name: String,
        season: Option<u32>,
        episode: u32,
    },

    /// Progress of the running episode download
    Download(DownloadEvent),

    /// An episode was published to the library
    EpisodeSucceeded {
        name: String,
        season: Option<u32>,
        episode: u32,
        path: PathBuf,
    },

    /// An episode could not be downloaded
    EpisodeFailed {
        name: String,
        season: Option<u32>,
        episode: u32,
        reason: String,
    },

    /// Remaining episodes of an incremental series were skipped after a failure
    SeriesHalted { name: String, skipped: Vec<u32> },

    /// The run is complete
    Complete(RunSummary),
}

/// Terminal state of an episode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeStatus {
    Succeeded,
    Failed,
}

/// Result of one episode download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub episode: u32,
    pub status: EpisodeStatus,
    /// Published file, for succeeded episodes
    pub path: Option<PathBuf>,
}

/// Counters describing a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Series processed, including failed ones
    pub series: usize,
    /// Series that could not be processed
    pub series_failed: usize,
    /// Episodes planned for download
    pub planned: usize,
    /// Episodes held back by the incremental gap rule
    pub deferred: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Episodes skipped after an incremental series halted
    pub skipped: usize,
}

/// Errors that end a whole series
#[derive(Debug, Error)]
pub enum SeriesError {
    /// The catalog page was unusable
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// The local folder could not be scanned
    #[error("Failed to scan {path}: {source}")]
    LocalState { path: PathBuf, source: io::Error },
}

/// Top-level error type for Saturno operations
#[derive(Debug, Error)]
pub enum SaturnoError {
    /// The configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The page fetcher could not be set up
    #[error("HTTP client error: {0}")]
    Fetch(#[from] FetchError),

    /// A download strategy could not be set up
    #[error("Download setup error: {0}")]
    Transport(#[from] TransportError),

    /// The notifier could not be set up
    #[error("Notifier setup error: {0}")]
    Notify(#[from] NotifyError),
}

/// Per-series result handed back to the run loop
#[derive(Debug, Default)]
struct SeriesReport {
    plan: SyncPlan,
    outcomes: Vec<DownloadOutcome>,
    skipped: usize,
}

/// Drives the per-series, per-episode loop
///
/// Every collaborator is passed in, so the pipeline can be run against
/// in-memory fakes as well as the real network.
pub struct Pipeline<'a> {
    config: &'a Config,
    fetcher: &'a dyn PageFetcher,
    engine: &'a DownloadEngine,
    notifier: &'a dyn Notifier,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        fetcher: &'a dyn PageFetcher,
        engine: &'a DownloadEngine,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            config,
            fetcher,
            engine,
            notifier,
        }
    }

    /// Processes the given series one after another
    ///
    /// A series that fails is reported and the run moves on to the next one.
    pub fn run(
        &self,
        series: &[&SeriesEntry],
        action: SyncAction,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> RunSummary {
        let mut summary = RunSummary::default();

        for entry in series {
            summary.series += 1;
            progress(ProgressEvent::SeriesStarted {
                name: entry.name.clone(),
                folder: entry.folder.clone(),
                mode: entry.mode,
            });

            match self.sync_series(entry, action, progress) {
                Ok(report) => {
                    summary.planned += report.plan.to_fetch.len();
                    summary.deferred += report.plan.deferred.len();
                    summary.skipped += report.skipped;
                    for outcome in &report.outcomes {
                        match outcome.status {
                            EpisodeStatus::Succeeded => summary.succeeded += 1,
                            EpisodeStatus::Failed => summary.failed += 1,
                        }
                    }
                }
                Err(e) => {
                    error!(series = %entry.name, error = %e, "series failed");
                    summary.series_failed += 1;
                    progress(ProgressEvent::SeriesFailed {
                        name: entry.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        progress(ProgressEvent::Complete(summary.clone()));
        summary
    }

    fn sync_series(
        &self,
        entry: &SeriesEntry,
        action: SyncAction,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<SeriesReport, SeriesError> {
        let locators = fetch_episode_index(self.fetcher, &entry.catalog_url)?;

        let layout = SeriesLayout::new(&self.config.output_root, &self.config.season_folder, entry);
        let local = layout
            .downloaded_episodes()
            .map_err(|e| SeriesError::LocalState {
                path: layout.directory().to_path_buf(),
                source: e,
            })?;

        let remote: Vec<u32> = locators.iter().map(|locator| locator.number).collect();
        let plan = plan_sync(&remote, &local, entry.mode);

        info!(
            series = %entry.name,
            remote = remote.len(),
            local = local.len(),
            to_fetch = ?plan.to_fetch,
            deferred = ?plan.deferred,
            "planned episodes"
        );
        progress(ProgressEvent::EpisodesPlanned {
            name: entry.name.clone(),
            local_count: local.len(),
            to_fetch: plan.to_fetch.clone(),
            deferred: plan.deferred.clone(),
        });

        let mut report = SeriesReport {
            plan,
            ..SeriesReport::default()
        };

        if action == SyncAction::DryRun {
            for &episode in &report.plan.to_fetch {
                progress(ProgressEvent::EpisodeFound {
                    name: entry.name.clone(),
                    season: entry.season,
                    episode,
                    destination: layout.episode_path(episode),
                });
            }
            return Ok(report);
        }

        for (index, &episode) in report.plan.to_fetch.iter().enumerate() {
            let Some(locator) = locators.iter().find(|locator| locator.number == episode) else {
                continue;
            };

            let outcome = self.sync_episode(entry, &layout, locator, progress);
            self.send_notice(entry, &outcome);
            let failed = outcome.status == EpisodeStatus::Failed;
            report.outcomes.push(outcome);

            if failed && entry.mode == SyncMode::Incremental {
                let skipped = report.plan.to_fetch[index + 1..].to_vec();
                if !skipped.is_empty() {
                    warn!(series = %entry.name, episode, ?skipped, "halting incremental series");
                    report.skipped = skipped.len();
                    progress(ProgressEvent::SeriesHalted {
                        name: entry.name.clone(),
                        skipped,
                    });
                }
                break;
            }
        }

        Ok(report)
    }

    /// Resolves and downloads one episode, never failing past this point
    fn sync_episode(
        &self,
        entry: &SeriesEntry,
        layout: &SeriesLayout,
        locator: &EpisodeLocator,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> DownloadOutcome {
        let episode = locator.number;
        progress(ProgressEvent::EpisodeStarted {
            name: entry.name.clone(),
            season: entry.season,
            episode,
        });

        let result = resolve_media(self.fetcher, &locator.detail_url)
            .map_err(|e| e.to_string())
            .and_then(|media| {
                debug!(episode, kind = media.delivery.label(), "resolved media");
                self.engine
                    .download(&media, &layout.episode_path(episode), &mut |event| {
                        progress(ProgressEvent::Download(event))
                    })
                    .map_err(|e| e.to_string())
            });

        match result {
            Ok(path) => {
                info!(series = %entry.name, episode, path = %path.display(), "episode downloaded");
                progress(ProgressEvent::EpisodeSucceeded {
                    name: entry.name.clone(),
                    season: entry.season,
                    episode,
                    path: path.clone(),
                });
                DownloadOutcome {
                    episode,
                    status: EpisodeStatus::Succeeded,
                    path: Some(path),
                }
            }
            Err(reason) => {
                error!(series = %entry.name, episode, error = %reason, "episode failed");
                progress(ProgressEvent::EpisodeFailed {
                    name: entry.name.clone(),
                    season: entry.season,
                    episode,
                    reason,
                });
                DownloadOutcome {
                    episode,
                    status: EpisodeStatus::Failed,
                    path: None,
                }
            }
        }
    }

    fn send_notice(&self, entry: &SeriesEntry, outcome: &DownloadOutcome) {
        let notice = EpisodeNotice {
            series_name: entry.name.clone(),
            season: entry.season,
            episode: outcome.episode,
            success: outcome.status == EpisodeStatus::Succeeded,
        };

        if let Err(e) = self.notifier.notify(&notice) {
            warn!(series = %entry.name, episode = outcome.episode, error = %e, "notification not delivered");
        }
    }
}

/// Picks the series a run works on
///
/// An empty filter selects every series. Folders in the filter that match no
/// series are reported with a warning.
pub fn select_series<'a>(config: &'a Config, folders: &[String]) -> Vec<&'a SeriesEntry> {
    if folders.is_empty() {
        return config.series.iter().collect();
    }

    let known: HashSet<&str> = config.series.iter().map(|s| s.folder.as_str()).collect();
    for folder in folders {
        if !known.contains(folder.as_str()) {
            warn!(folder = %folder, "no configured series uses this folder");
        }
    }

    config
        .series
        .iter()
        .filter(|series| folders.iter().any(|folder| *folder == series.folder))
        .collect()
}

/// Synchronizes the configured library
///
/// Fetches the catalog of every selected series, compares it to the episodes
/// already on disk and downloads what is missing. Per-episode and per-series
/// failures are reported through the callback and counted in the returned
/// summary; only setup failures end the run early. The library root must
/// already exist.
///
/// # Arguments
///
/// * `config` - The loaded configuration
/// * `action` - Whether to download or only report planned episodes
/// * `series_filter` - Folders to restrict the run to (empty selects all)
/// * `progress_callback` - Closure called with progress events
///
/// # Examples
///
/// ```no_run
/// use saturno::{Config, ProgressEvent, SyncAction, sync_library};
///
/// let config = Config::load(None).unwrap();
/// let summary = sync_library(&config, SyncAction::DryRun, &[], |event| {
///     if let ProgressEvent::EpisodeFound { name, episode, .. } = event {
///         println!("{name}: episode {episode} is new");
///     }
/// })
/// .unwrap();
///
/// println!("{} episode(s) planned", summary.planned);
/// ```
pub fn sync_library<F>(
    config: &Config,
    action: SyncAction,
    series_filter: &[String],
    mut progress_callback: F,
) -> Result<RunSummary, SaturnoError>
where
    F: FnMut(ProgressEvent),
{
    config.check_output_root()?;
    let series = select_series(config, series_filter);

    let fetcher = HttpFetcher::new(config.request_timeout())?;
    let engine = DownloadEngine::new(
        Box::new(ProgressiveStrategy::new(config.request_timeout())?),
        Box::new(RemuxStrategy::new(&config.ffmpeg_path)),
        Box::new(ExtractorStrategy::new(&config.extractor_path)),
        config.episode_timeout(),
    );

    let notifier: Box<dyn Notifier> = match (action, config.telegram_credentials()) {
        (SyncAction::Run, Some((token, chat_id))) => Box::new(TelegramNotifier::new(
            token,
            chat_id,
            config.request_timeout(),
        )?),
        _ => Box::new(NoopNotifier),
    };

    let pipeline = Pipeline::new(config, &fetcher, &engine, notifier.as_ref());
    Ok(pipeline.run(&series, action, &mut progress_callback))
}
