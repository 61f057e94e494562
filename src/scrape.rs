#![forbid(unsafe_code)]

//! Collects downloadable media referenced by a rendered web page.
//!
//! Rendering happens behind [`PageRenderer`]: the page runs a small script
//! that hands back every `href`/`src` it can see as plain JSON
//! ([`PageSnapshot`]). Filtering, URL resolution and deduplication happen
//! here, on the server side of that boundary.

use std::{collections::HashSet, path::PathBuf, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};
use url::Url;

use crate::browser::ChromeRenderer;
use crate::security::validate_target_url;

/// Extra time granted on top of the navigation timeout for launch, the
/// network-quiet wait and script evaluation.
const DEADLINE_MARGIN: Duration = Duration::from_secs(15);

/// Substrings that mark a URL as a media file. Matching is containment on the
/// lowercased URL, so `.mp4` inside a query parameter counts as well.
pub const MEDIA_EXTENSIONS: &[&str] = &[
    // images
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".bmp", ".ico",
    // documents
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".txt", ".csv",
    // audio
    ".mp3", ".wav", ".ogg", ".m4a",
    // video
    ".mp4", ".webm", ".mov", ".avi", ".mkv",
    // archives
    ".zip", ".rar", ".7z", ".tar", ".gz",
];

/// What the in-page script reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    /// `window.location.origin`; `"null"` for opaque origins.
    pub origin: String,
    /// `el.href || el.src` of every anchor, image, audio, video and source
    /// element, in document order.
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaReference {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub src: String,
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("invalid page url: {0}")]
    InvalidUrl(String),
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("page script failed: {0}")]
    Script(String),
    #[error("scrape did not finish within {0:?}")]
    Timeout(Duration),
    #[error("scrape task aborted: {0}")]
    Aborted(String),
}

impl ScrapeError {
    /// Whether the caller sent something unusable, as opposed to the browser
    /// failing.
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidUrl(_))
    }
}

/// Loads a page and reports its element URLs. Implementations block, the
/// scraper runs them on the blocking pool.
pub trait PageRenderer: Send + Sync + 'static {
    fn render(&self, url: &Url) -> Result<PageSnapshot, ScrapeError>;
}

pub fn is_media_candidate(raw: &str) -> bool {
    let lowered = raw.to_lowercase();
    MEDIA_EXTENSIONS
        .iter()
        .any(|extension| lowered.contains(extension))
}

fn resolve(base: Option<&Url>, raw: &str) -> Option<Url> {
    match Url::parse(raw) {
        Ok(url) => Some(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(raw).ok(),
        Err(_) => None,
    }
}

/// Name is the last `/` segment of the absolute URL without query string or
/// fragment; type is whatever follows its last dot. Both lowercased.
fn describe(src: Url) -> Option<MediaReference> {
    let serialized = String::from(src);
    let segment = serialized.rsplit('/').next().unwrap_or_default();
    let name = segment
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .to_lowercase();
    let kind = name.rsplit('.').next().unwrap_or_default().to_string();
    if name.is_empty() || kind.is_empty() {
        return None;
    }
    Some(MediaReference {
        name,
        kind,
        src: serialized,
    })
}

/// Turns raw element URLs into unique media references, first seen first.
pub fn collect_media(snapshot: &PageSnapshot) -> Vec<MediaReference> {
    let base = Url::parse(&snapshot.origin).ok();
    let mut seen = HashSet::new();
    let mut media = Vec::new();

    for raw in &snapshot.candidates {
        let raw = raw.trim();
        if raw.is_empty() || !is_media_candidate(raw) {
            continue;
        }
        let Some(reference) = resolve(base.as_ref(), raw).and_then(describe) else {
            continue;
        };
        if seen.insert(reference.clone()) {
            media.push(reference);
        }
    }

    media
}

#[derive(Clone)]
pub struct PageScraper {
    renderer: Arc<dyn PageRenderer>,
    deadline: Duration,
}

impl PageScraper {
    pub fn new(renderer: Arc<dyn PageRenderer>, deadline: Duration) -> Self {
        Self { renderer, deadline }
    }

    /// Scraper backed by a fresh headless Chromium per call.
    pub fn with_chrome(executable: Option<PathBuf>, navigation_timeout: Duration) -> Self {
        Self::new(
            Arc::new(ChromeRenderer::new(executable, navigation_timeout)),
            navigation_timeout + DEADLINE_MARGIN,
        )
    }

    pub async fn scrape_page(&self, url: &str) -> Result<Vec<MediaReference>, ScrapeError> {
        let target =
            validate_target_url(url).map_err(|err| ScrapeError::InvalidUrl(err.to_string()))?;
        info!(url = %target, "scraping page");

        let renderer = Arc::clone(&self.renderer);
        let render = tokio::task::spawn_blocking(move || renderer.render(&target));
        let snapshot = match timeout(self.deadline, render).await {
            Ok(Ok(result)) => result?,
            Ok(Err(err)) => return Err(ScrapeError::Aborted(err.to_string())),
            Err(_) => {
                // The blocking task keeps running until the browser's own
                // timeout fires; its session guard still closes the browser.
                warn!(%url, deadline = ?self.deadline, "scrape deadline exceeded");
                return Err(ScrapeError::Timeout(self.deadline));
            }
        };

        let media = collect_media(&snapshot);
        info!(%url, found = media.len(), "scrape finished");
        Ok(media)
    }
}
