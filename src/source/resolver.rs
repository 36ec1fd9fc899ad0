//! Media resolution
//!
//! Follows an episode detail page to its embedded player and classifies the
//! media URL found there by delivery mechanism.

use super::{Delivery, FetchError, PageFetcher, ResolvedMedia};
use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use tracing::debug;

/// Element on the detail page whose first link points at the player
const PLAYER_REFERENCE: &str = "div.card-body a[href]";

/// Quoted URL of a stream manifest or a plain video file
static MEDIA_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']([^"'\s]+?\.(?:m3u8|mp4)(?:\?[^"'\s]*)?)["']"#).expect("valid pattern")
});

/// Resolves the media behind an episode detail page
///
/// Network failures are returned as errors. Pages that simply do not lead to
/// a recognizable media URL resolve to [`Delivery::Unresolved`].
pub fn resolve_media(
    fetcher: &dyn PageFetcher,
    detail_url: &str,
) -> Result<ResolvedMedia, FetchError> {
    let detail_html = fetcher.fetch_page(detail_url)?;

    let Some(player_url) = find_player_reference(&detail_html, detail_url) else {
        debug!(url = detail_url, "no player reference on detail page");
        return Ok(ResolvedMedia {
            detail_url: detail_url.to_string(),
            delivery: Delivery::Unresolved,
        });
    };

    let player_html = fetcher.fetch_page(&player_url)?;
    let delivery = match find_media_url(&player_html, &player_url) {
        Some(media_url) => classify_media_url(&media_url),
        None => Delivery::Unresolved,
    };

    debug!(url = %player_url, kind = delivery.label(), "resolved episode media");

    Ok(ResolvedMedia {
        detail_url: player_url,
        delivery,
    })
}

/// Classifies a media URL by its file extension
pub fn classify_media_url(media_url: &str) -> Delivery {
    let path = Url::parse(media_url)
        .map(|url| url.path().to_ascii_lowercase())
        .unwrap_or_else(|_| {
            media_url
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase()
        });

    if path.ends_with(".m3u8") {
        Delivery::SegmentedStream {
            manifest_url: media_url.to_string(),
        }
    } else if path.ends_with(".mp4") {
        Delivery::ProgressiveFile {
            media_url: media_url.to_string(),
        }
    } else {
        Delivery::Unresolved
    }
}

/// Locates the embedded player link on a detail page
fn find_player_reference(html: &str, page_url: &str) -> Option<String> {
    let selector = Selector::parse(PLAYER_REFERENCE).expect("valid player selector");
    let document = Html::parse_document(html);

    let href = document.select(&selector).next()?.value().attr("href")?;
    absolutize(page_url, href)
}

/// Scans player markup for a media URL
///
/// Quoted URLs anywhere in the page (inline scripts included) take
/// precedence over `<source>` elements.
fn find_media_url(html: &str, page_url: &str) -> Option<String> {
    if let Some(found) = MEDIA_URL_PATTERN
        .captures(html)
        .and_then(|captures| captures.get(1))
    {
        let raw = found.as_str().replace("\\/", "/");
        return absolutize(page_url, &raw);
    }

    let selector = Selector::parse("source[src]").expect("valid source selector");
    let document = Html::parse_document(html);
    document
        .select(&selector)
        .filter_map(|source| source.value().attr("src"))
        .find_map(|src| absolutize(page_url, src))
}

fn absolutize(base: &str, href: &str) -> Option<String> {
    match Url::parse(base) {
        Ok(base) => base.join(href).ok().map(|url| url.to_string()),
        Err(_) => Some(href.to_string()),
    }
}
