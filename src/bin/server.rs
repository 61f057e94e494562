#![forbid(unsafe_code)]

//! Axum front end for mediascout.
//!
//! Three JSON endpoints sit in front of the library: video info and download
//! go through yt-dlp, page scraping goes through headless Chromium. Anything
//! outside `/api` is served from the static UI directory.

use std::{
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State, rejection::JsonRejection},
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use clap::Parser;
use mediascout::{
    config::{LogFormat, SettingsOverrides, load_settings},
    metadata::{MetadataAdapter, VideoMetadata},
    relay::{DownloadRequest, RelayError, StreamingRelay},
    scrape::{MediaReference, PageScraper},
    security::ensure_not_root,
    ytdlp::YtDlp,
};
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use tokio::{fs::File, net::TcpListener, signal};
use tokio_util::io::ReaderStream;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

// Client facing messages. Underlying causes only go to the log.
const DETAIL_MISSING_URL: &str = "Invalid or missing URL.";
const DETAIL_INFO_FAILED: &str = "Failed to fetch video information. The URL might be invalid, or the video could be private or restricted.";
const DETAIL_MISSING_DOWNLOAD_FIELDS: &str = "Missing URL, format ID, title or extension.";
const DETAIL_DOWNLOAD_FAILED: &str =
    "Failed to download video. Please try another format or video.";
const DETAIL_MISSING_SCRAPE_URL: &str = "Missing URL.";
const DETAIL_SCRAPE_FAILED: &str = "Failed to scrape the page. It might be protected or timed out.";

#[derive(Debug, Parser)]
#[command(author, version, about = "Video info, download relay and page media scraper")]
struct ServerArgs {
    /// Address to listen on (MEDIASCOUT_HOST)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (MEDIASCOUT_PORT)
    #[arg(long)]
    port: Option<u16>,
    /// Directory holding the static UI (MEDIASCOUT_WWW_ROOT)
    #[arg(long)]
    www_root: Option<PathBuf>,
    /// Path of the yt-dlp executable (MEDIASCOUT_YTDLP)
    #[arg(long)]
    ytdlp: Option<PathBuf>,
    /// Path of the Chromium executable (MEDIASCOUT_CHROME)
    #[arg(long)]
    chrome: Option<PathBuf>,
    /// Page navigation timeout in seconds (MEDIASCOUT_SCRAPE_TIMEOUT_SECS)
    #[arg(long, value_name = "SECS")]
    scrape_timeout: Option<u64>,
    /// `text` or `json` (MEDIASCOUT_LOG_FORMAT)
    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,
    /// Alternative `.env` file
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl ServerArgs {
    fn into_overrides(self) -> SettingsOverrides {
        SettingsOverrides {
            host: self.host,
            port: self.port,
            www_root: self.www_root,
            ytdlp: self.ytdlp,
            chrome: self.chrome,
            scrape_timeout_secs: self.scrape_timeout,
            log_format: self.log_format,
            env_path: self.env_file,
        }
    }
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    LogFormat::parse(value).ok_or_else(|| format!("unknown log format `{value}`, use text or json"))
}

fn parse_host(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/MEDIASCOUT_HOST")
}

/// Shared state handed to every handler. Nothing in here is mutable; each
/// request spawns its own subprocess or browser.
#[derive(Clone)]
struct AppState {
    metadata: MetadataAdapter,
    relay: StreamingRelay,
    scraper: PageScraper,
    www_root: Arc<PathBuf>,
}

impl AppState {
    fn new(tool: YtDlp, scraper: PageScraper, www_root: PathBuf) -> Self {
        Self {
            metadata: MetadataAdapter::new(tool.clone()),
            relay: StreamingRelay::new(tool),
            scraper,
            www_root: Arc::new(www_root),
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    fn not_found(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: detail.into(),
        }
    }

    fn method_not_allowed(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::METHOD_NOT_ALLOWED,
            detail: detail.into(),
        }
    }

    fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "detail": self.detail });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
struct UrlRequest {
    #[serde(default)]
    url: Option<String>,
}

impl UrlRequest {
    fn into_url(self) -> Option<String> {
        self.url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Serialize)]
struct ScrapeResponse {
    media: Vec<MediaReference>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    let settings = load_settings(args.into_overrides())?;
    init_tracing(settings.log_format);

    ensure_not_root("mediascout")?;

    let tool = YtDlp::new(&settings.ytdlp);
    tool.ensure_available().await.with_context(|| {
        format!(
            "yt-dlp is not usable at {}; run `fetch_ytdlp` or set MEDIASCOUT_YTDLP",
            settings.ytdlp.display()
        )
    })?;

    let scraper = PageScraper::with_chrome(settings.chrome.clone(), settings.scrape_timeout);
    let state = AppState::new(tool, scraper, settings.www_root.clone());
    let cors = build_cors_layer(&settings.allowed_origins)?;
    let app = router(state).layer(cors);

    let addr = SocketAddr::new(parse_host(&settings.host)?, settings.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(%addr, www_root = %settings.www_root.display(), "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(env_filter).init(),
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/video-info", post(video_info))
        .route("/api/download", post(download))
        .route("/api/scrape-page", post(scrape_page))
        .fallback(static_fallback)
        .with_state(state)
}

/// Allows every origin unless an allow-list is configured.
fn build_cors_layer(allowed_origins: &[String]) -> Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([header::CONTENT_DISPOSITION]);
    if allowed_origins.is_empty() {
        return Ok(layer.allow_origin(Any));
    }
    let origins = allowed_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin)
                .with_context(|| format!("invalid origin in MEDIASCOUT_ALLOWED_ORIGINS: {origin}"))
        })
        .collect::<Result<Vec<_>>>()?;
    info!(origins = ?allowed_origins, "CORS allow-list loaded");
    Ok(layer.allow_origin(AllowOrigin::list(origins)))
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
    }
}

async fn video_info(
    State(state): State<AppState>,
    payload: Result<Json<UrlRequest>, JsonRejection>,
) -> ApiResult<Json<VideoMetadata>> {
    let url = payload
        .ok()
        .and_then(|Json(request)| request.into_url())
        .ok_or_else(|| ApiError::bad_request(DETAIL_MISSING_URL))?;

    let metadata = state.metadata.fetch_metadata(&url).await.map_err(|err| {
        error!(%url, error = %err, "fetching video info failed");
        ApiError::internal(DETAIL_INFO_FAILED)
    })?;
    Ok(Json(metadata))
}

async fn download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = payload.map_err(|err| {
        warn!(error = %err, "unreadable download request");
        ApiError::bad_request(DETAIL_MISSING_DOWNLOAD_FIELDS)
    })?;

    let download = state
        .relay
        .relay_download(request)
        .await
        .map_err(|err| match err {
            RelayError::Init(missing) => {
                warn!(error = %missing, "rejecting download request");
                ApiError::bad_request(DETAIL_MISSING_DOWNLOAD_FIELDS)
            }
            other => {
                error!(error = %other, "download failed before streaming");
                ApiError::internal(DETAIL_DOWNLOAD_FAILED)
            }
        })?;

    // Headers are final from here on; a failing tool only cuts the body short.
    let disposition = HeaderValue::from_str(&download.filename.content_disposition())
        .map_err(|err| {
            error!(error = %err, filename = %download.filename.unicode, "unusable download filename");
            ApiError::internal(DETAIL_DOWNLOAD_FAILED)
        })?;
    let mut response = Body::from_stream(download.body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(download.content_type),
    );
    Ok(response)
}

async fn scrape_page(
    State(state): State<AppState>,
    payload: Result<Json<UrlRequest>, JsonRejection>,
) -> ApiResult<Json<ScrapeResponse>> {
    let url = payload
        .ok()
        .and_then(|Json(request)| request.into_url())
        .ok_or_else(|| ApiError::bad_request(DETAIL_MISSING_SCRAPE_URL))?;

    match state.scraper.scrape_page(&url).await {
        Ok(media) => {
            if media.is_empty() {
                info!(%url, "no media found on page");
            }
            Ok(Json(ScrapeResponse { media }))
        }
        Err(err) if err.is_invalid_request() => {
            warn!(%url, error = %err, "rejecting scrape request");
            Err(ApiError::bad_request(DETAIL_MISSING_URL))
        }
        Err(err) => {
            error!(%url, error = %err, "scraping page failed");
            Err(ApiError::internal(DETAIL_SCRAPE_FAILED))
        }
    }
}

async fn static_fallback(State(state): State<AppState>, req: Request) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return ApiError::method_not_allowed("method not allowed").into_response();
    }

    match serve_www_path(&state.www_root, path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn serve_www_path(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_www_path(root, request_path)?;
    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_dir() => stream_file(&root.join("index.html")).await,
        Ok(_) => stream_file(&target).await,
        Err(_) if should_fallback_to_index(request_path) => {
            stream_file(&root.join("index.html")).await
        }
        Err(_) => Err(ApiError::not_found("file not found")),
    }
}

fn resolve_www_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

/// Client side routes have no extension and land on the SPA entry point.
fn should_fallback_to_index(request_path: &str) -> bool {
    let trimmed = request_path.trim_start_matches('/');
    trimmed.is_empty() || Path::new(trimmed).extension().is_none()
}

async fn stream_file(path: &Path) -> ApiResult<Response> {
    let file = File::open(path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    if let Some(mime) = MimeGuess::from_path(path).first() {
        if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
    }
    Ok(response)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use mediascout::scrape::{PageRenderer, PageSnapshot, ScrapeError};
    use serde_json::{Value, json};
    use std::{
        fs,
        io::Read,
        os::unix::fs::PermissionsExt,
        time::Duration,
    };
    use tempfile::TempDir;
    use url::Url;

    struct CannedRenderer(Result<Vec<&'static str>, &'static str>);

    impl PageRenderer for CannedRenderer {
        fn render(&self, url: &Url) -> Result<PageSnapshot, ScrapeError> {
            let candidates = self.0.clone().map_err(|err| ScrapeError::Navigation(err.into()))?;
            Ok(PageSnapshot {
                origin: url.origin().ascii_serialization(),
                candidates: candidates.into_iter().map(String::from).collect(),
            })
        }
    }

    struct TestContext {
        dir: TempDir,
        state: AppState,
    }

    impl TestContext {
        /// `tool_body` is the shell script standing in for yt-dlp.
        fn new(tool_body: &str, renderer: CannedRenderer) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let tool = dir.path().join("yt-dlp");
            let marker = dir.path().join("invoked");
            fs::write(
                &tool,
                format!("#!/bin/sh\ntouch '{}'\n{tool_body}\n", marker.display()),
            )
            .unwrap();
            fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

            let www = dir.path().join("www");
            fs::create_dir_all(www.join("assets")).unwrap();
            fs::write(www.join("index.html"), "<!doctype html><title>ui</title>").unwrap();
            fs::write(www.join("assets/app.js"), "console.log('ui')").unwrap();

            let scraper = PageScraper::new(Arc::new(renderer), Duration::from_secs(5));
            let state = AppState::new(YtDlp::new(tool), scraper, www);
            Self { dir, state }
        }

        fn with_tool(tool_body: &str) -> Self {
            Self::new(tool_body, CannedRenderer(Ok(Vec::new())))
        }

        fn tool_invoked(&self) -> bool {
            self.dir.path().join("invoked").exists()
        }
    }

    async fn error_detail(err: ApiError) -> (StatusCode, String) {
        let response = err.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        (status, parsed["detail"].as_str().unwrap().to_string())
    }

    fn download_payload(value: Value) -> Result<Json<DownloadRequest>, JsonRejection> {
        Ok(Json(serde_json::from_value(value).unwrap()))
    }

    fn url_payload(url: Option<&str>) -> Result<Json<UrlRequest>, JsonRejection> {
        Ok(Json(UrlRequest {
            url: url.map(String::from),
        }))
    }

    #[test]
    fn server_args_map_to_overrides() {
        let args = ServerArgs::parse_from([
            "mediascout",
            "--port",
            "9000",
            "--scrape-timeout",
            "12",
            "--log-format",
            "json",
        ]);
        let overrides = args.into_overrides();
        assert_eq!(overrides.port, Some(9000));
        assert_eq!(overrides.scrape_timeout_secs, Some(12));
        assert_eq!(overrides.log_format, Some(LogFormat::Json));
        assert!(overrides.host.is_none());
    }

    #[test]
    fn server_args_reject_unknown_log_format() {
        assert!(ServerArgs::try_parse_from(["mediascout", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn cors_layer_rejects_invalid_origins() {
        assert!(build_cors_layer(&[]).is_ok());
        assert!(build_cors_layer(&["https://app.example.com".into()]).is_ok());
        assert!(build_cors_layer(&["bad\norigin".into()]).is_err());
    }

    #[tokio::test]
    async fn api_error_serializes_detail() {
        let (status, detail) = error_detail(ApiError::not_found("missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(detail, "missing");
    }

    #[tokio::test]
    async fn video_info_requires_url() {
        let ctx = TestContext::with_tool("exit 1");
        let err = video_info(State(ctx.state.clone()), url_payload(Some("  ")))
            .await
            .unwrap_err();
        assert_eq!(error_detail(err).await, (StatusCode::BAD_REQUEST, DETAIL_MISSING_URL.into()));
        assert!(!ctx.tool_invoked());
    }

    #[tokio::test]
    async fn video_info_returns_decorated_formats() {
        let ctx = TestContext::with_tool(
            r#"echo '{"title":"Clip","uploader":"Someone","thumbnail":"https://img.example/t.jpg","formats":[{"format_id":"18","ext":"mp4","filesize":2048},{"format_id":"140","ext":"m4a","filesize_approx":1024},{"format_id":"sb0","ext":"mhtml"}]}'"#,
        );
        let Json(metadata) = video_info(
            State(ctx.state.clone()),
            url_payload(Some("https://video.example/watch?v=1")),
        )
        .await
        .unwrap();
        let body = serde_json::to_value(metadata).unwrap();
        assert_eq!(body["title"], "Clip");
        assert_eq!(body["uploader"], "Someone");
        assert_eq!(body["formats"][0]["filesize_str"], "2 KB");
        assert_eq!(body["formats"][1]["filesize_str"], "~1 KB");
        assert_eq!(body["formats"][2]["filesize_str"], "N/A");
    }

    #[tokio::test]
    async fn video_info_hides_tool_errors() {
        let ctx = TestContext::with_tool("echo 'ERROR: /home/svc/secret path' >&2\nexit 1");
        let err = video_info(State(ctx.state.clone()), url_payload(Some("https://x.example")))
            .await
            .unwrap_err();
        let (status, detail) = error_detail(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(detail, DETAIL_INFO_FAILED);
        assert!(!detail.contains("secret"));
    }

    #[tokio::test]
    async fn download_without_extension_is_rejected_before_spawning() {
        let ctx = TestContext::with_tool("printf data");
        let err = download(
            State(ctx.state.clone()),
            download_payload(json!({
                "url": "https://video.example/watch?v=1",
                "format_id": "18",
                "title": "Clip",
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(
            error_detail(err).await,
            (StatusCode::BAD_REQUEST, DETAIL_MISSING_DOWNLOAD_FIELDS.into())
        );
        assert!(!ctx.tool_invoked());
    }

    #[tokio::test]
    async fn download_streams_with_attachment_headers() {
        let ctx = TestContext::with_tool("printf 'video-bytes'");
        let response = download(
            State(ctx.state.clone()),
            download_payload(json!({
                "url": "https://video.example/watch?v=1",
                "format_id": "18",
                "title": "Señor: Clip?",
                "extension": "mp4",
            })),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/octet-stream"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"Se_or_ Clip_.mp4\"; filename*=UTF-8''Se%C3%B1or_%20Clip_.mp4"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"video-bytes");
    }

    #[tokio::test]
    async fn download_failure_before_output_is_500() {
        let ctx = TestContext::with_tool("echo 'ERROR: format not available' >&2\nexit 1");
        let err = download(
            State(ctx.state.clone()),
            download_payload(json!({
                "url": "https://video.example/watch?v=1",
                "format_id": "999",
                "title": "Clip",
                "extension": "mp4",
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(
            error_detail(err).await,
            (StatusCode::INTERNAL_SERVER_ERROR, DETAIL_DOWNLOAD_FAILED.into())
        );
    }

    #[tokio::test]
    async fn download_failure_mid_stream_cuts_the_body() {
        let ctx = TestContext::with_tool("printf 'partial'\nexit 3");
        let response = download(
            State(ctx.state.clone()),
            download_payload(json!({
                "url": "https://video.example/watch?v=1",
                "format_id": "18",
                "title": "Clip",
                "extension": "mp4",
            })),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(header::CONTENT_DISPOSITION));
        assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mid_stream_failure_over_http_keeps_server_alive() {
        let ctx = TestContext::with_tool("printf 'partial'\nsleep 0.2\nexit 3");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(ctx.state.clone());
        tokio::spawn(async move { axum::serve(listener, app).await });

        let base = format!("http://{addr}");
        let (first, follow_up) = tokio::task::spawn_blocking(move || {
            // The abort may land before or after the status line is read.
            let first = match ureq::post(&format!("{base}/api/download")).send_json(ureq::json!({
                "url": "https://video.example/watch?v=1",
                "format_id": "18",
                "title": "Clip",
                "extension": "mp4",
            })) {
                Ok(response) => {
                    let status = response.status();
                    let disposition = response.header("content-disposition").map(String::from);
                    let mut body = Vec::new();
                    let read = response.into_reader().read_to_end(&mut body);
                    Some((status, disposition, read.is_err() || body.len() <= b"partial".len()))
                }
                Err(ureq::Error::Transport(_)) => None,
                Err(other) => panic!("unexpected download result: {other:?}"),
            };

            let follow_up = match ureq::post(&format!("{base}/api/video-info"))
                .send_json(ureq::json!({}))
            {
                Err(ureq::Error::Status(code, _)) => code,
                other => panic!("unexpected follow-up result: {other:?}"),
            };
            (first, follow_up)
        })
        .await
        .unwrap();

        if let Some((status, disposition, truncated)) = first {
            assert_eq!(status, 200);
            assert!(disposition.unwrap().starts_with("attachment;"));
            assert!(truncated);
        }
        assert_eq!(follow_up, 400);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_json_body_is_400() {
        let ctx = TestContext::with_tool("exit 0");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(ctx.state.clone());
        tokio::spawn(async move { axum::serve(listener, app).await });

        let status = tokio::task::spawn_blocking(move || {
            match ureq::post(&format!("http://{addr}/api/scrape-page"))
                .set("Content-Type", "application/json")
                .send_string("{not json")
            {
                Err(ureq::Error::Status(code, response)) => {
                    let body: Value = response.into_json().unwrap();
                    assert_eq!(body["detail"], DETAIL_MISSING_SCRAPE_URL);
                    code
                }
                other => panic!("unexpected result: {other:?}"),
            }
        })
        .await
        .unwrap();
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn scrape_page_returns_media() {
        let ctx = TestContext::new(
            "exit 0",
            CannedRenderer(Ok(vec!["https://example.com/photo.JPG?v=2", "/about", "/doc.pdf"])),
        );
        let Json(response) = scrape_page(
            State(ctx.state.clone()),
            url_payload(Some("https://example.com/gallery")),
        )
        .await
        .unwrap();
        let body = serde_json::to_value(response).unwrap();
        assert_eq!(
            body,
            json!({"media": [
                {"name": "photo.jpg", "type": "jpg", "src": "https://example.com/photo.JPG?v=2"},
                {"name": "doc.pdf", "type": "pdf", "src": "https://example.com/doc.pdf"},
            ]})
        );
    }

    #[tokio::test]
    async fn scrape_page_without_media_is_200_and_empty() {
        let ctx = TestContext::new("exit 0", CannedRenderer(Ok(vec!["/about"])));
        let Json(response) = scrape_page(
            State(ctx.state.clone()),
            url_payload(Some("https://example.com")),
        )
        .await
        .unwrap();
        assert!(response.media.is_empty());
    }

    #[tokio::test]
    async fn scrape_page_hides_browser_errors() {
        let ctx = TestContext::new("exit 0", CannedRenderer(Err("Timeout while navigating")));
        let err = scrape_page(State(ctx.state.clone()), url_payload(Some("https://slow.example")))
            .await
            .unwrap_err();
        assert_eq!(
            error_detail(err).await,
            (StatusCode::INTERNAL_SERVER_ERROR, DETAIL_SCRAPE_FAILED.into())
        );
    }

    #[tokio::test]
    async fn scrape_page_validates_url() {
        let ctx = TestContext::with_tool("exit 0");
        let err = scrape_page(State(ctx.state.clone()), url_payload(None))
            .await
            .unwrap_err();
        assert_eq!(
            error_detail(err).await,
            (StatusCode::BAD_REQUEST, DETAIL_MISSING_SCRAPE_URL.into())
        );

        let err = scrape_page(State(ctx.state.clone()), url_payload(Some("file:///etc/passwd")))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn static_files_and_spa_fallback() {
        let ctx = TestContext::with_tool("exit 0");
        let root = ctx.state.www_root.as_path();

        let response = serve_www_path(root, "/assets/app.js").await.unwrap();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/javascript"
        );

        let response = serve_www_path(root, "/how-to-use").await.unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.starts_with(b"<!doctype html>"));

        let err = serve_www_path(root, "/missing.css").await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let err = serve_www_path(root, "/../secret.txt").await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_api_routes_are_json_404() {
        let ctx = TestContext::with_tool("exit 0");
        let request = Request::builder()
            .uri("/api/nope")
            .body(Body::empty())
            .unwrap();
        let response = static_fallback(State(ctx.state.clone()), request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn static_ui_only_answers_get() {
        let ctx = TestContext::with_tool("exit 0");
        let request = Request::builder()
            .method(Method::POST)
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let response = static_fallback(State(ctx.state.clone()), request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["detail"], "method not allowed");

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = static_fallback(State(ctx.state.clone()), request).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn bundled_ui_lists_only_downloadable_formats() {
        let page = fs::read_to_string(Path::new(env!("CARGO_MANIFEST_DIR")).join("www/index.html"))
            .unwrap();
        assert!(page.contains("f.url && (f.vcodec !== 'none' || f.acodec !== 'none')"));
        assert!(page.contains("(b.height || 0) - (a.height || 0)"));
    }
}
