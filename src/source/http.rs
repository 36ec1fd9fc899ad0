/// Blocking HTTP page fetcher.
use super::{FetchError, PageFetcher};
use std::time::Duration;

/// Identifies the client to the remote catalog
const USER_AGENT: &str = concat!("saturno/", env!("CARGO_PKG_VERSION"));

/// Page fetcher backed by a blocking reqwest client.
///
/// Every request is bounded by the timeout given at construction, so a
/// hanging server cannot stall a run.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    /// Creates a new fetcher with the given per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::RequestFailed {
                url: String::new(),
                reason: e.to_string(),
            })?;

        Ok(Self { client })
    }
}

impl PageFetcher for HttpFetcher {
    fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| FetchError::RequestFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        // Ensure request was successful
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        response.text().map_err(|e| FetchError::RequestFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}
