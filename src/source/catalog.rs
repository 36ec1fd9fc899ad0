//! Episode index extraction
//!
//! Reads a series catalog page and lists the episode detail pages it links
//! to, together with the episode number encoded in each link.

use super::{EpisodeLocator, FetchError, PageFetcher};
use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, warn};

/// Container holding the episode links on a catalog page
const EPISODE_CONTAINER: &str = "div.tab-content";

/// An `ep-<N>` path segment, delimited on both sides
static EPISODE_NUMBER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-/]ep-(\d+)(?:[-/?#.]|$)").expect("valid pattern")
});

/// Errors that can occur while extracting the episode index
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The catalog page could not be fetched
    #[error("Failed to fetch catalog page: {0}")]
    Fetch(#[from] FetchError),

    /// The page does not contain the expected markup
    #[error("Episode list not found on {url} (expected '{container}')")]
    ContainerMissing { url: String, container: &'static str },
}

/// Fetches a catalog page and extracts its episode index
pub fn fetch_episode_index(
    fetcher: &dyn PageFetcher,
    catalog_url: &str,
) -> Result<Vec<EpisodeLocator>, ExtractionError> {
    let html = fetcher.fetch_page(catalog_url)?;
    extract_episodes(&html, catalog_url)
}

/// Extracts the episode index from catalog markup
///
/// Links are resolved against `page_url`. Links whose episode number cannot
/// be read are skipped; when the same number appears twice the first link
/// wins. The result is ordered by ascending episode number.
pub fn extract_episodes(
    html: &str,
    page_url: &str,
) -> Result<Vec<EpisodeLocator>, ExtractionError> {
    let container_selector = Selector::parse(EPISODE_CONTAINER).expect("valid container selector");
    let link_selector = Selector::parse("a[href]").expect("valid link selector");

    let document = Html::parse_document(html);
    let container = document.select(&container_selector).next().ok_or_else(|| {
        ExtractionError::ContainerMissing {
            url: page_url.to_string(),
            container: EPISODE_CONTAINER,
        }
    })?;

    let base = Url::parse(page_url).ok();
    let mut episodes: BTreeMap<u32, String> = BTreeMap::new();

    for link in container.select(&link_selector) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };

        let Some(number) = episode_number(href) else {
            warn!(url = page_url, href, "skipping episode link without a readable number");
            continue;
        };

        let detail_url = match &base {
            Some(base) => match base.join(href) {
                Ok(url) => url.to_string(),
                Err(e) => {
                    warn!(url = page_url, href, error = %e, "skipping malformed episode link");
                    continue;
                }
            },
            None => href.to_string(),
        };

        if episodes.contains_key(&number) {
            debug!(number, href, "duplicate episode link ignored");
            continue;
        }
        episodes.insert(number, detail_url);
    }

    Ok(episodes
        .into_iter()
        .map(|(number, detail_url)| EpisodeLocator { number, detail_url })
        .collect())
}

/// Reads the episode number out of an `ep-<N>` link segment
///
/// The last matching segment wins, so digits earlier in the slug are never
/// taken for the episode.
fn episode_number(href: &str) -> Option<u32> {
    EPISODE_NUMBER_PATTERN
        .captures_iter(href)
        .last()
        .and_then(|captures| captures.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .filter(|&number| number > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG_URL: &str = "https://example.org/anime/made-in-abyss";

    fn catalog(links: &[&str]) -> String {
        let anchors: String = links
            .iter()
            .map(|href| format!(r#"<a href="{href}" class="btn">Episode</a>"#))
            .collect();
        format!(
            r#"<html><body>
                <nav><a href="/anime/other-ep-99">Unrelated</a></nav>
                <div class="tab-content"><div class="tab-pane">{anchors}</div></div>
            </body></html>"#
        )
    }

    #[test]
    fn test_extract_sorted_absolute_links() {
        let html = catalog(&[
            "https://example.org/ep/made-in-abyss-ep-2",
            "/ep/made-in-abyss-ep-1",
            "https://example.org/ep/made-in-abyss-ep-10",
        ]);

        let episodes = extract_episodes(&html, CATALOG_URL).unwrap();

        assert_eq!(
            episodes,
            vec![
                EpisodeLocator {
                    number: 1,
                    detail_url: "https://example.org/ep/made-in-abyss-ep-1".to_string()
                },
                EpisodeLocator {
                    number: 2,
                    detail_url: "https://example.org/ep/made-in-abyss-ep-2".to_string()
                },
                EpisodeLocator {
                    number: 10,
                    detail_url: "https://example.org/ep/made-in-abyss-ep-10".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_unparseable_link_is_skipped() {
        let html = catalog(&[
            "/ep/made-in-abyss-ep-1",
            "/ep/made-in-abyss-ep-2",
            "/ep/made-in-abyss-ep-3",
            "/ep/made-in-abyss-special",
            "/ep/made-in-abyss-ep-5",
        ]);

        let numbers: Vec<u32> = extract_episodes(&html, CATALOG_URL)
            .unwrap()
            .into_iter()
            .map(|e| e.number)
            .collect();

        assert_eq!(numbers, vec![1, 2, 3, 5]);
    }

    #[test]
    fn test_numbering_need_not_start_at_one() {
        let html = catalog(&["/ep/x-ep-13", "/ep/x-ep-14"]);
        let numbers: Vec<u32> = extract_episodes(&html, CATALOG_URL)
            .unwrap()
            .into_iter()
            .map(|e| e.number)
            .collect();

        assert_eq!(numbers, vec![13, 14]);
    }

    #[test]
    fn test_links_outside_container_ignored() {
        let html = catalog(&[]);
        assert!(extract_episodes(&html, CATALOG_URL).unwrap().is_empty());
    }

    #[test]
    fn test_missing_container() {
        let html = r#"<html><body><div class="redesigned"><a href="/ep/x-ep-1">1</a></div></body></html>"#;

        let result = extract_episodes(html, CATALOG_URL);
        assert!(matches!(result, Err(ExtractionError::ContainerMissing { .. })));
    }

    #[test]
    fn test_episode_number_segment() {
        assert_eq!(episode_number("/anime/deep-12-ep-3"), Some(3));
        assert_eq!(episode_number("/anime/deep-12-ep-3-sub-ita"), Some(3));
        assert_eq!(episode_number("/play/made-in-abyss/ep-7?lang=it"), Some(7));
        assert_eq!(episode_number("/play/made-in-abyss-ep-8.html"), Some(8));
        assert_eq!(episode_number("/anime/sheep-4"), None);
        assert_eq!(episode_number("/anime/step-12x"), None);
        assert_eq!(episode_number("/anime/x-ep-0"), None);
    }

    #[test]
    fn test_numbered_slug_uses_episode_segment() {
        let html = catalog(&["/anime/deep-12-ep-3", "/anime/deep-12-ep-4"]);
        let numbers: Vec<u32> = extract_episodes(&html, CATALOG_URL)
            .unwrap()
            .into_iter()
            .map(|e| e.number)
            .collect();

        assert_eq!(numbers, vec![3, 4]);
    }

    #[test]
    fn test_duplicate_numbers_keep_first() {
        let html = catalog(&["/ep/x-ep-1", "/ep/x-ep-1-mirror"]);
        let episodes = extract_episodes(&html, CATALOG_URL).unwrap();

        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].detail_url, "https://example.org/ep/x-ep-1");
    }
}
