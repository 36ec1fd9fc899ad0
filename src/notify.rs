//! Episode notifications
//!
//! Reports finished and failed episodes to an external channel. Delivery is
//! best effort: a notifier error is logged by the caller and never changes
//! the outcome of the download it describes.

use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Errors that can occur while delivering a notification
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The request could not be sent
    #[error("Notification request failed: {0}")]
    RequestError(String),

    /// The channel rejected the message
    #[error("Notification rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// What happened to one episode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeNotice {
    pub series_name: String,
    pub season: Option<u32>,
    pub episode: u32,
    pub success: bool,
}

/// Trait for delivering episode notices
pub trait Notifier {
    fn notify(&self, notice: &EpisodeNotice) -> Result<(), NotifyError>;
}

/// Notifier used when no channel is configured
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notice: &EpisodeNotice) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

/// Delivers notices through the Telegram Bot API
pub struct TelegramNotifier {
    client: reqwest::blocking::Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// Creates a notifier posting as the bot identified by `token`
    pub fn new(token: &str, chat_id: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::RequestError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{TELEGRAM_API}/bot{token}/sendMessage"),
            chat_id: chat_id.to_string(),
        })
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, notice: &EpisodeNotice) -> Result<(), NotifyError> {
        let text = format_message(notice, Local::now().date_naive());

        let response = self
            .client
            .post(&self.endpoint)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text: &text,
                parse_mode: "Markdown",
            })
            .send()
            // The endpoint embeds the bot token, keep it out of the message
            .map_err(|e| NotifyError::RequestError(e.without_url().to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(NotifyError::Rejected { status, body });
        }

        Ok(())
    }
}

/// Renders the Markdown message for a notice
pub fn format_message(notice: &EpisodeNotice, date: NaiveDate) -> String {
    let (emoji, title) = if notice.success {
        ("✅", "Download Successful")
    } else {
        ("⛔", "Download Failed")
    };

    let episode = match notice.season {
        Some(season) => format!("*{season}*×*{}*", notice.episode),
        None => format!("*{}*", notice.episode),
    };

    format!(
        "{emoji} *{title}* {emoji}\n\n🎬 *{}*\n🌀 Episode {episode}\n📅 {}\n",
        escape_markdown(&notice.series_name),
        date.format("%d.%m.%Y")
    )
}

/// Escapes the characters legacy Telegram Markdown treats as markup
fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
