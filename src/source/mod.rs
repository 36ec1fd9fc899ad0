/// Remote content source.
///
/// This module provides the structures describing episodes offered by the
/// remote catalog and the media behind them, the trait used to fetch remote
/// pages, and the two scraping stages built on top of it: the episode index
/// extractor and the media resolver.
mod catalog;
mod http;
mod resolver;

pub use catalog::{ExtractionError, extract_episodes, fetch_episode_index};
pub use http::HttpFetcher;
pub use resolver::{classify_media_url, resolve_media};

use thiserror::Error;

/// Errors that can occur while fetching a remote page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL could not be parsed
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The request failed before a response was received
    #[error("Request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    /// The server answered with a non-success status
    #[error("HTTP {status} while fetching {url}")]
    HttpStatus { url: String, status: u16 },
}

/// One episode offered by the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeLocator {
    /// Episode number encoded in the link
    pub number: u32,
    /// Absolute URL of the episode detail page
    pub detail_url: String,
}

/// How the media of an episode is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A single streamable file
    ProgressiveFile { media_url: String },
    /// A manifest of segments that must be remuxed into one file
    SegmentedStream { manifest_url: String },
    /// No recognizable media URL was found
    Unresolved,
}

impl Delivery {
    /// Short label used in logs and progress output
    pub fn label(&self) -> &'static str {
        match self {
            Delivery::ProgressiveFile { .. } => "progressive",
            Delivery::SegmentedStream { .. } => "segmented",
            Delivery::Unresolved => "unresolved",
        }
    }
}

/// The media behind an episode detail page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMedia {
    /// Page the general-purpose extractor is pointed at when the direct
    /// media URL does not work out
    pub detail_url: String,
    /// Classified media locator
    pub delivery: Delivery,
}

/// Trait for collaborators that can fetch remote pages.
///
/// The pipeline only ever needs the page body as text; implementors decide
/// how it is transported.
pub trait PageFetcher {
    /// Fetches the page at `url` and returns its body.
    fn fetch_page(&self, url: &str) -> Result<String, FetchError>;
}
