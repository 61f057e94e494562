#![forbid(unsafe_code)]

//! Headless Chromium renderer for the page scraper.

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::scrape::{PageRenderer, PageSnapshot, ScrapeError};

/// How long the browser may sit without DevTools traffic before the library
/// gives up on it. Must outlast the navigation timeout plus the quiet wait.
const IDLE_MARGIN: Duration = Duration::from_secs(10);

/// Resolves once the page stopped requesting resources for 500ms, or after 5s.
/// Stands in for "at most two connections in flight" since lazily loaded media
/// usually shows up after the `load` event.
const NETWORK_QUIET_SCRIPT: &str = r#"
new Promise((resolve) => {
    const quietMs = 500;
    const capMs = 5000;
    const started = Date.now();
    let seen = performance.getEntriesByType('resource').length;
    let quietSince = started;
    const tick = () => {
        const now = Date.now();
        const count = performance.getEntriesByType('resource').length;
        if (count !== seen) {
            seen = count;
            quietSince = now;
        }
        if (now - quietSince >= quietMs || now - started >= capMs) {
            resolve(count);
        } else {
            setTimeout(tick, 100);
        }
    };
    tick();
})
"#;

/// Runs inside the page. Returns a JSON string so the result crosses the
/// DevTools boundary as a plain value.
const EXTRACTION_SCRIPT: &str = r#"
(() => {
    const candidates = [];
    document.querySelectorAll('a, img, audio, video, source').forEach((el) => {
        const value = el.href || el.src;
        if (typeof value === 'string' && value.length > 0) {
            candidates.push(value);
        }
    });
    return JSON.stringify({ origin: window.location.origin, candidates });
})()
"#;

/// Launches a fresh, throwaway Chromium profile for every page.
pub struct ChromeRenderer {
    executable: Option<PathBuf>,
    navigation_timeout: Duration,
}

impl ChromeRenderer {
    pub fn new(executable: Option<PathBuf>, navigation_timeout: Duration) -> Self {
        Self {
            executable,
            navigation_timeout,
        }
    }

    fn launch_options(&self) -> LaunchOptions<'static> {
        LaunchOptions {
            headless: true,
            sandbox: false,
            path: self.executable.clone(),
            idle_browser_timeout: self.navigation_timeout + IDLE_MARGIN,
            ..Default::default()
        }
    }
}

/// A loaded browser with one open tab. Whoever owns it owns the browser
/// process; dropping it must release both.
trait PageSession {
    fn navigate(&self, url: &Url) -> Result<(), ScrapeError>;
    fn evaluate(&self, script: &str, await_promise: bool) -> Result<Option<Value>, ScrapeError>;
}

/// Owns the browser process for one scrape. Dropping it (on success, error or
/// unwinding) kills Chromium and removes its temporary profile.
struct BrowserSession {
    // Field order is drop order: the tab goes before its browser.
    tab: Arc<Tab>,
    browser: Browser,
    started: Instant,
}

impl BrowserSession {
    fn launch(options: LaunchOptions<'static>, timeout: Duration) -> Result<Self, ScrapeError> {
        let browser =
            Browser::new(options).map_err(|err| ScrapeError::Launch(format!("{err:#}")))?;
        let tab = browser
            .new_tab()
            .map_err(|err| ScrapeError::Launch(format!("{err:#}")))?;
        tab.set_default_timeout(timeout);
        Ok(Self {
            tab,
            browser,
            started: Instant::now(),
        })
    }
}

impl PageSession for BrowserSession {
    fn navigate(&self, url: &Url) -> Result<(), ScrapeError> {
        self.tab
            .navigate_to(url.as_str())
            .and_then(|tab| tab.wait_until_navigated())
            .map(|_| ())
            .map_err(|err| ScrapeError::Navigation(format!("{err:#}")))
    }

    fn evaluate(&self, script: &str, await_promise: bool) -> Result<Option<Value>, ScrapeError> {
        self.tab
            .evaluate(script, await_promise)
            .map(|result| result.value)
            .map_err(|err| ScrapeError::Script(format!("{err:#}")))
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        debug!(
            elapsed = ?self.started.elapsed(),
            pid = ?self.browser.get_process_id(),
            "closing browser"
        );
    }
}

/// Loads `url`, waits for the network to settle and extracts candidates.
/// Takes the session by value so it is released on every return path.
fn take_snapshot(session: impl PageSession, url: &Url) -> Result<PageSnapshot, ScrapeError> {
    session.navigate(url)?;

    if let Err(err) = session.evaluate(NETWORK_QUIET_SCRIPT, true) {
        warn!(%url, error = %err, "network quiet wait failed, extracting anyway");
    }

    let value = session.evaluate(EXTRACTION_SCRIPT, false)?;
    let raw = value
        .as_ref()
        .and_then(Value::as_str)
        .ok_or_else(|| ScrapeError::Script("extraction returned no data".into()))?;
    let snapshot: PageSnapshot =
        serde_json::from_str(raw).map_err(|err| ScrapeError::Script(err.to_string()))?;
    debug!(%url, candidates = snapshot.candidates.len(), "page snapshot taken");
    Ok(snapshot)
}

impl PageRenderer for ChromeRenderer {
    fn render(&self, url: &Url) -> Result<PageSnapshot, ScrapeError> {
        let session = BrowserSession::launch(self.launch_options(), self.navigation_timeout)?;
        take_snapshot(session, url)
    }
}
