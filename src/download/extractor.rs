//! General-purpose extractor strategy
//!
//! Hands a page URL to a youtube-dl compatible program (yt-dlp by default)
//! and lets it figure out the media on its own. Used as the fallback when the
//! directly resolved media URL does not work out.

use super::process::run_supervised;
use super::{Deadline, Strategy, TransferProgress, TransportError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

static PROGRESS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[download\]\s+(\d+(?:\.\d+)?)%").expect("valid pattern"));

/// Episode download through an external extractor program
pub struct ExtractorStrategy {
    program: PathBuf,
}

impl ExtractorStrategy {
    /// Creates a new strategy running the given program
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Builds the argument vector for a download
    fn command(&self, source: &str, destination: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--no-playlist")
            .arg("--newline")
            .arg("--no-warnings")
            .arg("--format")
            .arg("best")
            .arg("--output")
            .arg(output_template(destination))
            .arg("--")
            .arg(source);
        command
    }
}

impl Strategy for ExtractorStrategy {
    fn name(&self) -> &'static str {
        "extractor"
    }

    fn fetch(
        &self,
        source: &str,
        destination: &Path,
        deadline: &Deadline,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<(), TransportError> {
        let program = self.program_name();
        let mut command = self.command(source, destination);

        let outcome = run_supervised(&mut command, &program, deadline, &mut |line| {
            if let Some(percent) = parse_progress(line) {
                progress(TransferProgress::Percent(percent));
            }
        })?;

        outcome.into_result(&program)
    }
}

/// The output option is a template; literal percent signs must be doubled
fn output_template(destination: &Path) -> String {
    destination.to_string_lossy().replace('%', "%%")
}

/// Reads the completion percentage from a `[download]` line
fn parse_progress(line: &str) -> Option<f32> {
    PROGRESS_PATTERN
        .captures(line.trim_start())
        .and_then(|captures| captures.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
