#![forbid(unsafe_code)]

//! Guards shared by the mediascout binaries.
//!
//! The scraper launches Chromium with its sandbox disabled, so the process
//! itself must not carry root privileges, and the browser must only ever be
//! pointed at remote web pages.

use anyhow::{Result, bail};
use nix::unistd::Uid;
use thiserror::Error;
use url::Url;

/// Fails fast when a binary is started as root.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!(
            "{process} must not be run as root; the headless browser runs unsandboxed, \
             use a regular user or a dedicated service account"
        );
    }
    Ok(())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetUrlError {
    #[error("url is empty")]
    Empty,
    #[error("url could not be parsed: {0}")]
    Malformed(#[from] url::ParseError),
    #[error("scheme `{0}` is not allowed, only http and https pages can be scraped")]
    Scheme(String),
    #[error("url has no host")]
    MissingHost,
}

/// Parses a page URL the browser is about to load. `file:`, `data:`,
/// `chrome:` and friends are rejected so requests cannot read local files
/// through the browser.
pub fn validate_target_url(raw: &str) -> Result<Url, TargetUrlError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TargetUrlError::Empty);
    }
    let url = Url::parse(trimmed)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(TargetUrlError::Scheme(url.scheme().to_string()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(TargetUrlError::MissingHost);
    }
    Ok(url)
}
