#![forbid(unsafe_code)]

//! Video metadata as reported by yt-dlp, decorated for display.
//!
//! The structs mirror the subset of `--dump-single-json` the UI reads. Every
//! other field of a format record is kept in `extra` and handed back to the
//! client untouched.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::size::format_bytes;
use crate::ytdlp::{YtDlp, last_error_line};

const UNKNOWN_SIZE: &str = "N/A";

/// One encoding/resolution/container combination offered for a URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormatDescriptor {
    pub format_id: String,
    #[serde(default)]
    pub ext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcodec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acodec: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_byte_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub filesize: Option<u64>,
    #[serde(
        default,
        deserialize_with = "lenient_byte_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub filesize_approx: Option<u64>,
    /// Display string filled in by [`decorate_formats`].
    #[serde(default)]
    pub filesize_str: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FormatDescriptor {
    /// Exact size first, then the estimate prefixed with `~`, else `N/A`.
    pub fn display_size(&self) -> String {
        match (self.filesize, self.filesize_approx) {
            (Some(exact), _) => format_bytes(exact),
            (None, Some(approx)) => format!("~{}", format_bytes(approx)),
            (None, None) => UNKNOWN_SIZE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub formats: Vec<FormatDescriptor>,
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to launch yt-dlp: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("yt-dlp exited with {status}: {message}")]
    Tool { status: String, message: String },
    #[error("unreadable yt-dlp metadata: {0}")]
    Parse(#[source] serde_json::Error),
}

/// yt-dlp reports sizes as integers, but a few extractors emit floats.
fn lenient_byte_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Number>::deserialize(deserializer)?;
    Ok(value.and_then(|number| {
        number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|float| float.is_finite() && *float >= 0.0)
                .map(|float| float as u64)
        })
    }))
}

/// Fills `filesize_str` on every format. Order and membership are untouched;
/// filtering for display happens client side.
pub fn decorate_formats(formats: &mut [FormatDescriptor]) {
    for format in formats {
        format.filesize_str = format.display_size();
    }
}

/// Parses a raw `--dump-single-json` payload and decorates its formats.
pub fn parse_metadata(raw: &[u8]) -> Result<VideoMetadata, ExtractionError> {
    let mut metadata: VideoMetadata =
        serde_json::from_slice(raw).map_err(ExtractionError::Parse)?;
    decorate_formats(&mut metadata.formats);
    Ok(metadata)
}

#[derive(Debug, Clone)]
pub struct MetadataAdapter {
    tool: YtDlp,
}

impl MetadataAdapter {
    pub fn new(tool: YtDlp) -> Self {
        Self { tool }
    }

    pub async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata, ExtractionError> {
        info!(%url, "fetching video info");
        let output = self
            .tool
            .command()
            .arg("--dump-single-json")
            .arg("--no-warnings")
            .arg("--skip-download")
            .arg("--")
            .arg(url)
            .output()
            .await
            .map_err(ExtractionError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::Tool {
                status: output.status.to_string(),
                message: last_error_line(&stderr)
                    .unwrap_or("no error output")
                    .to_string(),
            });
        }

        let metadata = parse_metadata(&output.stdout)?;
        debug!(%url, formats = metadata.formats.len(), "video info parsed");
        Ok(metadata)
    }
}
