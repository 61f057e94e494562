#![forbid(unsafe_code)]

//! Streams a yt-dlp download straight into an HTTP response body.
//!
//! The relay never buffers a whole file: stdout of the child is read in
//! bounded chunks and handed to the response as it arrives. Headers are
//! decided up front from the client supplied title/extension; the tool is not
//! asked for metadata a second time.

use std::{io, process::Stdio};

use bytes::{Bytes, BytesMut};
use futures::{
    StreamExt,
    future,
    stream::{self, BoxStream},
};
use serde::Deserialize;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::{Child, ChildStderr},
    task::JoinHandle,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info};

use crate::ytdlp::YtDlp;

/// Read size for the child's stdout.
const CHUNK_SIZE: usize = 64 * 1024;
const FALLBACK_TITLE: &str = "download";

pub const DOWNLOAD_CONTENT_TYPE: &str = "application/octet-stream";

/// Raw download request as posted by the UI. Every field is required but kept
/// optional here so missing values turn into a typed error instead of a
/// deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub format_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
}

#[derive(Debug, Error)]
#[error("missing required field `{0}`")]
pub struct DownloadInitError(pub &'static str);

#[derive(Debug, Clone, PartialEq, Eq)]
struct DownloadJob {
    url: String,
    format_id: String,
    title: String,
    extension: String,
}

impl DownloadRequest {
    fn validate(self) -> Result<DownloadJob, DownloadInitError> {
        fn required(value: Option<String>, field: &'static str) -> Result<String, DownloadInitError> {
            value
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or(DownloadInitError(field))
        }

        Ok(DownloadJob {
            url: required(self.url, "url")?,
            format_id: required(self.format_id, "format_id")?,
            title: required(self.title, "title")?,
            extension: required(self.extension, "extension")?,
        })
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Init(#[from] DownloadInitError),
    #[error("failed to launch yt-dlp: {0}")]
    Spawn(#[source] io::Error),
    #[error("reading yt-dlp output: {0}")]
    Read(#[source] io::Error),
    #[error("yt-dlp exited with {status} before sending data: {message}")]
    Tool { status: String, message: String },
}

/// Characters that are unsafe in file names on common filesystems. ASCII
/// control characters are folded in as well since they are invalid in
/// header values.
fn is_forbidden(c: char) -> bool {
    matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || c.is_ascii_control()
}

/// Replaces every run of forbidden characters with a single `_` and trims
/// surrounding whitespace.
pub fn sanitize_title(value: &str) -> String {
    let mut sanitized = String::with_capacity(value.len());
    let mut in_run = false;
    for c in value.chars() {
        if is_forbidden(c) {
            if !in_run {
                sanitized.push('_');
            }
            in_run = true;
        } else {
            sanitized.push(c);
            in_run = false;
        }
    }
    sanitized.trim().to_string()
}

/// The two names a download is offered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadFilename {
    /// Full name, possibly containing any Unicode.
    pub unicode: String,
    /// Same name with every non-ASCII code point replaced by `_`.
    pub ascii: String,
}

impl DownloadFilename {
    pub fn new(title: &str, extension: &str) -> Self {
        let mut stem = sanitize_title(title);
        if stem.is_empty() {
            stem = FALLBACK_TITLE.to_string();
        }
        let unicode = format!("{stem}.{}", sanitize_title(extension));
        let ascii = unicode
            .chars()
            .map(|c| if c.is_ascii() { c } else { '_' })
            .collect();
        Self { unicode, ascii }
    }

    /// RFC 6266 value: old clients read `filename`, the rest `filename*`.
    pub fn content_disposition(&self) -> String {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            self.ascii,
            urlencoding::encode(&self.unicode)
        )
    }
}

/// A download whose first bytes already arrived. Dropping `body` kills the
/// child process.
pub struct DownloadStream {
    pub filename: DownloadFilename,
    pub content_type: &'static str,
    pub body: BoxStream<'static, io::Result<Bytes>>,
}

#[derive(Debug, Clone)]
pub struct StreamingRelay {
    tool: YtDlp,
}

impl StreamingRelay {
    pub fn new(tool: YtDlp) -> Self {
        Self { tool }
    }

    /// Validates the request, spawns `yt-dlp -f <format> -o - -- <url>` and waits
    /// for the first chunk of output. Failures up to that point are returned
    /// as errors; a failure afterwards ends `body` with an `Err` item so the
    /// server aborts the connection.
    pub async fn relay_download(
        &self,
        request: DownloadRequest,
    ) -> Result<DownloadStream, RelayError> {
        let job = request.validate()?;
        let filename = DownloadFilename::new(&job.title, &job.extension);
        info!(
            url = %job.url,
            format_id = %job.format_id,
            filename = %filename.unicode,
            "starting download relay"
        );

        let mut child = self
            .tool
            .command()
            .arg("-f")
            .arg(&job.format_id)
            .arg("-o")
            .arg("-")
            .arg("--")
            .arg(&job.url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(RelayError::Spawn)?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| RelayError::Spawn(io::Error::other("stdout was not captured")))?;
        let stderr = child.stderr.take().map(|stderr| tokio::spawn(drain_stderr(stderr)));

        let mut first = BytesMut::with_capacity(CHUNK_SIZE);
        let read = stdout
            .read_buf(&mut first)
            .await
            .map_err(RelayError::Read)?;

        if read == 0 {
            let status = child.wait().await.map_err(RelayError::Read)?;
            if !status.success() {
                return Err(RelayError::Tool {
                    status: status.to_string(),
                    message: stderr_tail(stderr).await,
                });
            }
            debug!(url = %job.url, "yt-dlp finished without output");
            return Ok(DownloadStream {
                filename,
                content_type: DOWNLOAD_CONTENT_TYPE,
                body: stream::empty().boxed(),
            });
        }

        let head = stream::once(future::ready(Ok(first.freeze())));
        let rest = ReaderStream::with_capacity(stdout, CHUNK_SIZE);
        let tail = stream::once(finish(child, stderr, job.url)).filter_map(future::ready);

        Ok(DownloadStream {
            filename,
            content_type: DOWNLOAD_CONTENT_TYPE,
            body: head.chain(rest).chain(tail).boxed(),
        })
    }
}

/// Runs once stdout hit EOF. A non-zero exit turns into a trailing error item.
async fn finish(
    mut child: Child,
    stderr: Option<JoinHandle<String>>,
    url: String,
) -> Option<io::Result<Bytes>> {
    match child.wait().await {
        Ok(status) if status.success() => {
            debug!(%url, "download relay complete");
            None
        }
        Ok(status) => {
            let message = stderr_tail(stderr).await;
            error!(%url, %status, %message, "yt-dlp failed mid-stream");
            Some(Err(io::Error::other(format!("yt-dlp exited with {status}"))))
        }
        Err(err) => {
            error!(%url, error = %err, "waiting on yt-dlp failed");
            Some(Err(err))
        }
    }
}

/// Keeps the pipe drained so a chatty tool never blocks on stderr, and keeps
/// the last non-empty line for error reports.
async fn drain_stderr(stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut last = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "mediascout::ytdlp", "{line}");
        if !line.trim().is_empty() {
            last = line.trim().to_string();
        }
    }
    last
}

async fn stderr_tail(handle: Option<JoinHandle<String>>) -> String {
    let tail = match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    };
    if tail.is_empty() {
        "no error output".to_string()
    } else {
        tail
    }
}
