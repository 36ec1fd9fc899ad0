//! Download strategy engine
//!
//! This module turns a [`ResolvedMedia`] into a file in the local library.
//! The primary strategy is chosen by delivery kind; when it fails the
//! general-purpose extractor gets one more try against the detail page.
//! Every attempt writes to a staging file that is only renamed to the final
//! name once complete, so a failed episode never leaves a file that a later
//! scan would mistake for a finished download.

mod extractor;
mod process;
mod progressive;
mod remux;

pub use extractor::ExtractorStrategy;
pub use progressive::ProgressiveStrategy;
pub use remux::RemuxStrategy;

use crate::source::{Delivery, ResolvedMedia};
use crate::staging::StagingFile;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised by a single download attempt
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP request failed
    #[error("Request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },

    /// The server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    /// The connection broke while the body was being received
    #[error("Transfer from {url} interrupted: {source}")]
    Interrupted { url: String, source: io::Error },

    /// The body did not match the announced size
    #[error("Size mismatch: expected {expected} bytes, received {received}")]
    SizeMismatch { expected: u64, received: u64 },

    /// The payload is not a video container
    #[error("Downloaded data is not a video (detected {0})")]
    NotMedia(String),

    /// Writing the staging file failed
    #[error("Failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    /// A helper program could not be started
    #[error("Failed to launch {program}: {source}")]
    Spawn { program: String, source: io::Error },

    /// A helper program exited unsuccessfully
    #[error("{program} exited with {status}: {detail}")]
    ProcessFailed {
        program: String,
        status: String,
        detail: String,
    },

    /// The attempt reported success without producing data
    #[error("{strategy} produced no output")]
    EmptyOutput { strategy: &'static str },

    /// The episode ran out of time
    #[error("Timed out after {0:?}")]
    TimedOut(Duration),
}

/// Errors that make an episode download fail
#[derive(Debug, Error)]
pub enum DownloadError {
    /// No media URL was found for the episode
    #[error("No media found behind {detail_url}")]
    Unresolved { detail_url: String },

    /// The destination could not be prepared or published
    #[error("Filesystem error at {path}: {source}")]
    Filesystem { path: PathBuf, source: io::Error },

    /// The primary strategy failed and the fallback was not attempted
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// Both the primary strategy and the fallback failed
    #[error("{primary}; fallback failed: {fallback}")]
    Exhausted {
        primary: TransportError,
        fallback: TransportError,
    },
}

/// Time budget shared by every attempt for one episode
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Duration,
}

impl Deadline {
    /// Starts a budget of `limit` from now
    pub fn after(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    /// Time left, zero once expired
    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.started.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Fails with [`TransportError::TimedOut`] once the budget is used up
    pub fn check(&self) -> Result<(), TransportError> {
        if self.is_expired() {
            Err(self.timeout_error())
        } else {
            Ok(())
        }
    }

    /// The error reported when this budget runs out
    pub fn timeout_error(&self) -> TransportError {
        TransportError::TimedOut(self.limit)
    }
}

/// Progress of a running transfer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransferProgress {
    /// Bytes received, with the total when the server announced it
    Bytes { downloaded: u64, total: Option<u64> },
    /// Completion percentage reported by a helper program
    Percent(f32),
}

/// Events emitted while an episode downloads
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    /// A strategy starts working on a source URL
    Attempt {
        strategy: &'static str,
        source: String,
    },
    /// The running strategy made progress
    Transfer(TransferProgress),
    /// The running strategy failed
    AttemptFailed {
        strategy: &'static str,
        reason: String,
    },
}

/// Trait for the ways an episode can be transferred
///
/// Implementors write the complete media to `destination` and return once
/// it is fully written. They must give up once `deadline` expires.
pub trait Strategy {
    /// Short name used in logs and progress output
    fn name(&self) -> &'static str;

    /// Transfers `source` to `destination`
    fn fetch(
        &self,
        source: &str,
        destination: &Path,
        deadline: &Deadline,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<(), TransportError>;
}

/// Runs the strategy chain for single episodes
pub struct DownloadEngine {
    progressive: Box<dyn Strategy>,
    remux: Box<dyn Strategy>,
    fallback: Box<dyn Strategy>,
    episode_timeout: Duration,
}

impl DownloadEngine {
    /// Creates an engine from its three strategies
    pub fn new(
        progressive: Box<dyn Strategy>,
        remux: Box<dyn Strategy>,
        fallback: Box<dyn Strategy>,
        episode_timeout: Duration,
    ) -> Self {
        Self {
            progressive,
            remux,
            fallback,
            episode_timeout,
        }
    }

    /// Downloads an episode to `destination`
    ///
    /// Returns the published path. On error nothing exists at
    /// `destination` that this call created.
    pub fn download(
        &self,
        media: &ResolvedMedia,
        destination: &Path,
        on_event: &mut dyn FnMut(DownloadEvent),
    ) -> Result<PathBuf, DownloadError> {
        let (primary, source) = match &media.delivery {
            Delivery::ProgressiveFile { media_url } => (self.progressive.as_ref(), media_url),
            Delivery::SegmentedStream { manifest_url } => (self.remux.as_ref(), manifest_url),
            Delivery::Unresolved => {
                return Err(DownloadError::Unresolved {
                    detail_url: media.detail_url.clone(),
                });
            }
        };

        let deadline = Deadline::after(self.episode_timeout);

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| DownloadError::Filesystem {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let staging = StagingFile::new(destination).map_err(|e| DownloadError::Filesystem {
            path: destination.to_path_buf(),
            source: e,
        })?;

        let primary_error = match attempt(primary, source, &staging, &deadline, on_event) {
            Ok(()) => return publish(&staging),
            Err(e) => e,
        };

        if matches!(primary_error, TransportError::TimedOut(_)) {
            return Err(primary_error.into());
        }

        info!(
            strategy = primary.name(),
            error = %primary_error,
            url = %media.detail_url,
            "primary strategy failed, trying fallback"
        );
        staging.discard();

        match attempt(
            self.fallback.as_ref(),
            &media.detail_url,
            &staging,
            &deadline,
            on_event,
        ) {
            Ok(()) => publish(&staging),
            Err(fallback_error) => Err(DownloadError::Exhausted {
                primary: primary_error,
                fallback: fallback_error,
            }),
        }
    }
}

/// Runs one strategy against the staging file
fn attempt(
    strategy: &dyn Strategy,
    source: &str,
    staging: &StagingFile,
    deadline: &Deadline,
    on_event: &mut dyn FnMut(DownloadEvent),
) -> Result<(), TransportError> {
    debug!(strategy = strategy.name(), source, "starting attempt");
    on_event(DownloadEvent::Attempt {
        strategy: strategy.name(),
        source: source.to_string(),
    });

    let result = deadline.check().and_then(|()| {
        strategy.fetch(source, staging.path(), deadline, &mut |progress| {
            on_event(DownloadEvent::Transfer(progress))
        })
    });

    let result = result.and_then(|()| {
        if staging.has_content() {
            Ok(())
        } else {
            Err(TransportError::EmptyOutput {
                strategy: strategy.name(),
            })
        }
    });

    if let Err(e) = &result {
        warn!(strategy = strategy.name(), source, error = %e, "attempt failed");
        on_event(DownloadEvent::AttemptFailed {
            strategy: strategy.name(),
            reason: e.to_string(),
        });
    }

    result
}

fn publish(staging: &StagingFile) -> Result<PathBuf, DownloadError> {
    staging.publish().map_err(|e| DownloadError::Filesystem {
        path: staging.path().to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;

    /// What a scripted strategy does when invoked
    #[derive(Debug, Clone)]
    pub(crate) enum Script {
        Write(&'static [u8]),
        WritePartialThenFail(&'static [u8]),
        Fail,
        Timeout,
    }

    /// Strategy replaying a fixed behavior and recording its sources
    pub(crate) struct ScriptedStrategy {
        pub name: &'static str,
        pub script: Script,
        pub calls: RefCell<Vec<String>>,
    }

    impl ScriptedStrategy {
        pub(crate) fn new(name: &'static str, script: Script) -> Self {
            Self {
                name,
                script,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl Strategy for ScriptedStrategy {
        fn name(&self) -> &'static str {
            self.name
        }

        fn fetch(
            &self,
            source: &str,
            destination: &Path,
            _deadline: &Deadline,
            progress: &mut dyn FnMut(TransferProgress),
        ) -> Result<(), TransportError> {
            self.calls.borrow_mut().push(source.to_string());
            match &self.script {
                Script::Write(data) => {
                    fs::write(destination, data).map_err(|e| TransportError::Write {
                        path: destination.to_path_buf(),
                        source: e,
                    })?;
                    progress(TransferProgress::Percent(100.0));
                    Ok(())
                }
                Script::WritePartialThenFail(data) => {
                    fs::write(destination, data).map_err(|e| TransportError::Write {
                        path: destination.to_path_buf(),
                        source: e,
                    })?;
                    Err(TransportError::SizeMismatch {
                        expected: data.len() as u64 * 2,
                        received: data.len() as u64,
                    })
                }
                Script::Fail => Err(TransportError::ProcessFailed {
                    program: self.name.to_string(),
                    status: "exit status: 1".to_string(),
                    detail: "scripted failure".to_string(),
                }),
                Script::Timeout => Err(TransportError::TimedOut(Duration::from_secs(1))),
            }
        }
    }

    /// Shared handle so tests can inspect a strategy owned by the engine
    pub(crate) struct Shared(pub std::rc::Rc<ScriptedStrategy>);

    impl Strategy for Shared {
        fn name(&self) -> &'static str {
            self.0.name()
        }

        fn fetch(
            &self,
            source: &str,
            destination: &Path,
            deadline: &Deadline,
            progress: &mut dyn FnMut(TransferProgress),
        ) -> Result<(), TransportError> {
            self.0.fetch(source, destination, deadline, progress)
        }
    }
}
