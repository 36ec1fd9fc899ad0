use clap::{Parser, Subcommand};
use humansize::{DECIMAL, format_size};
use saturno::{
    Config, ConfigError, DownloadEvent, ProgressEvent, RunSummary, SyncAction, TransferProgress,
    sync_library,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

/// Keep a local library of episodic series in sync with their catalog pages
#[derive(Parser, Debug)]
#[command(name = "saturno", version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Library root, overrides the configured path
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download every missing episode
    Run {
        /// Only sync the series stored in this folder (repeatable)
        #[arg(short, long = "series", value_name = "FOLDER")]
        series: Vec<String>,
    },
    /// Show which episodes would be downloaded, without downloading
    Test {
        /// Only check the series stored in this folder (repeatable)
        #[arg(short, long = "series", value_name = "FOLDER")]
        series: Vec<String>,
    },
    /// List the configured series
    List,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("warn,saturno={level}"))),
        )
        .with_writer(io::stderr)
        .init();
}

fn format_episode(season: Option<u32>, episode: u32) -> String {
    match season {
        Some(season) => format!("{season}x{episode}"),
        None => format!("episode {episode}"),
    }
}

fn format_episodes(episodes: &[u32]) -> String {
    episodes
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Overwrites the current terminal line with transfer progress
fn print_transfer(progress: TransferProgress) {
    let line = match progress {
        TransferProgress::Bytes {
            downloaded,
            total: Some(total),
        } if total > 0 => format!(
            "{} / {} ({}%)",
            format_size(downloaded, DECIMAL),
            format_size(total, DECIMAL),
            downloaded * 100 / total
        ),
        TransferProgress::Bytes { downloaded, .. } => format_size(downloaded, DECIMAL),
        TransferProgress::Percent(percent) => format!("{percent:.1}%"),
    };

    print!("\r    {line:<40}");
    let _ = io::stdout().flush();
}

/// Handles progress events and prints formatted output to stdout
fn handle_progress_event(event: ProgressEvent) {
    match event {
        ProgressEvent::SeriesStarted { name, folder, mode } => {
            println!("\n=== {} ({}, {}) ===", name, folder, mode);
        }
        ProgressEvent::SeriesFailed { name, reason } => {
            println!("  Skipping {}: {}", name, reason);
        }
        ProgressEvent::EpisodesPlanned {
            local_count,
            to_fetch,
            deferred,
            ..
        } => {
            if to_fetch.is_empty() {
                println!("  Up to date ({} episode(s) on disk)", local_count);
            } else {
                println!(
                    "  {} new episode(s): {}",
                    to_fetch.len(),
                    format_episodes(&to_fetch)
                );
            }
            if !deferred.is_empty() {
                println!(
                    "  Waiting for missing episodes before: {}",
                    format_episodes(&deferred)
                );
            }
        }
        ProgressEvent::EpisodeFound {
            season,
            episode,
            destination,
            ..
        } => {
            println!(
                "  Would download {} -> {}",
                format_episode(season, episode),
                destination.display()
            );
        }
        ProgressEvent::EpisodeStarted {
            name,
            season,
            episode,
        } => {
            println!("  Downloading {} {}", name, format_episode(season, episode));
        }
        ProgressEvent::Download(DownloadEvent::Attempt { strategy, .. }) => {
            println!("    via {}", strategy);
        }
        ProgressEvent::Download(DownloadEvent::Transfer(progress)) => print_transfer(progress),
        ProgressEvent::Download(DownloadEvent::AttemptFailed { strategy, reason }) => {
            println!("\n    {} failed: {}", strategy, reason);
        }
        ProgressEvent::EpisodeSucceeded {
            season,
            episode,
            path,
            ..
        } => {
            println!(
                "\n  ✓ {} saved to {}",
                format_episode(season, episode),
                path.display()
            );
        }
        ProgressEvent::EpisodeFailed {
            season,
            episode,
            reason,
            ..
        } => {
            println!("\n  ✗ {} failed: {}", format_episode(season, episode), reason);
        }
        ProgressEvent::SeriesHalted { skipped, .. } => {
            println!(
                "  Stopping here, skipped episode(s): {}",
                format_episodes(&skipped)
            );
        }
        ProgressEvent::Complete(summary) => print_summary(&summary),
    }
}

fn print_summary(summary: &RunSummary) {
    println!("\n=== Summary ===");
    println!(
        "Series: {} ({} failed)",
        summary.series, summary.series_failed
    );
    println!(
        "Episodes: {} planned, {} downloaded, {} failed",
        summary.planned, summary.succeeded, summary.failed
    );
    if summary.deferred > 0 || summary.skipped > 0 {
        println!(
            "Held back: {} deferred, {} skipped",
            summary.deferred, summary.skipped
        );
    }
}

fn print_series(config: &Config) {
    println!("Library: {}\n", config.output_root.display());

    if config.series.is_empty() {
        println!("No series configured.");
        return;
    }

    for entry in &config.series {
        let season = entry
            .season
            .map(|s| format!("season {s}"))
            .unwrap_or_else(|| "no season".to_string());
        println!(
            "{} [{}] folder: {}, mode: {}",
            entry.name, season, entry.folder, entry.mode
        );
        println!("  {}", entry.catalog_url);
    }
}

/// Loads the configuration and applies the command line override
fn load_config(path: Option<&Path>, output: Option<PathBuf>) -> Result<Config, ConfigError> {
    let config = Config::load(path)?;
    match output {
        Some(output) => config.with_output_root(output),
        None => Ok(config),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match load_config(cli.config.as_deref(), cli.output) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let (action, series) = match cli.command {
        Command::Run { series } => (SyncAction::Run, series),
        Command::Test { series } => (SyncAction::DryRun, series),
        Command::List => {
            print_series(&config);
            return;
        }
    };

    if let Err(e) = sync_library(&config, action, &series, handle_progress_event) {
        eprintln!("\nError: {}", e);
        process::exit(1);
    }
}
