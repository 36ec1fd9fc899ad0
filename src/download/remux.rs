//! Segmented stream strategy
//!
//! Remuxes an HLS manifest into a single mp4 file with ffmpeg, copying the
//! streams without re-encoding.

use super::{Deadline, Strategy, TransferProgress, TransportError};
use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// How often the deadline is checked while ffmpeg is silent
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Episode download by remuxing a segmented stream
pub struct RemuxStrategy {
    ffmpeg: PathBuf,
}

impl RemuxStrategy {
    /// Creates a new strategy running the given ffmpeg binary
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    fn command(&self, manifest_url: &str, destination: &Path) -> FfmpegCommand {
        let mut command = FfmpegCommand::new_with_path(&self.ffmpeg);
        command
            .hide_banner()
            .input(manifest_url)
            .codec_video("copy")
            .codec_audio("copy")
            .args(["-bsf:a", "aac_adtstoasc"])
            // The staging name carries no usable extension
            .format("mp4")
            .overwrite()
            .output(destination.to_string_lossy());
        command
    }
}

impl Strategy for RemuxStrategy {
    fn name(&self) -> &'static str {
        "remux"
    }

    fn fetch(
        &self,
        source: &str,
        destination: &Path,
        deadline: &Deadline,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<(), TransportError> {
        let mut child = self
            .command(source, destination)
            .spawn()
            .map_err(|e| TransportError::Spawn {
                program: "ffmpeg".to_string(),
                source: e,
            })?;

        let events = child.iter().map_err(|e| TransportError::ProcessFailed {
            program: "ffmpeg".to_string(),
            status: "unreadable output".to_string(),
            detail: e.to_string(),
        })?;

        // The iterator blocks, so it is drained on a separate thread while
        // this one keeps an eye on the deadline
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for event in events {
                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        let mut duration: Option<f64> = None;
        let mut last_error: Option<String> = None;

        loop {
            match rx.recv_timeout(deadline.remaining().min(POLL_INTERVAL)) {
                Ok(FfmpegEvent::ParsedDuration(parsed)) => {
                    if parsed.duration > 0.0 {
                        duration = Some(parsed.duration);
                    }
                }
                Ok(FfmpegEvent::Progress(update)) => {
                    if let (Some(total), Some(done)) = (duration, parse_timestamp(&update.time)) {
                        let percent = (done / total * 100.0).clamp(0.0, 100.0) as f32;
                        progress(TransferProgress::Percent(percent));
                    }
                }
                Ok(FfmpegEvent::Log(LogLevel::Error | LogLevel::Fatal, message)) => {
                    debug!(message = %message, "ffmpeg error output");
                    last_error = Some(message);
                }
                Ok(FfmpegEvent::Error(message)) => last_error = Some(message),
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => {
                    if deadline.is_expired() {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(deadline.timeout_error());
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let status = child.wait().map_err(|e| TransportError::Spawn {
            program: "ffmpeg".to_string(),
            source: e,
        })?;

        if !status.success() {
            return Err(TransportError::ProcessFailed {
                program: "ffmpeg".to_string(),
                status: status.to_string(),
                detail: last_error.unwrap_or_else(|| "no error output".to_string()),
            });
        }

        Ok(())
    }
}

/// Parses an ffmpeg `HH:MM:SS.ss` timestamp into seconds
fn parse_timestamp(timestamp: &str) -> Option<f64> {
    let mut parts = timestamp.trim().split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;

    if parts.next().is_some() || hours < 0.0 {
        return None;
    }

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
