#![forbid(unsafe_code)]

//! Installs the latest yt-dlp release next to the server so it does not
//! depend on whatever version the system package manager ships.

use anyhow::{Context, Result, bail};
use clap::Parser;
use mediascout::{
    security::ensure_not_root,
    ytdlp::{LOCAL_TOOL_DIR, YtDlp, binary_name},
};
use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::info;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

const RELEASE_BASE: &str = "https://github.com/yt-dlp/yt-dlp/releases/latest/download";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Parser)]
#[command(author, version, about = "Download the latest yt-dlp release")]
struct FetchArgs {
    /// Target directory
    #[arg(long, default_value = LOCAL_TOOL_DIR)]
    dir: PathBuf,
    /// Release asset to fetch instead of the one matching this platform
    #[arg(long)]
    asset: Option<String>,
}

/// Release asset published for the current platform.
fn platform_asset() -> &'static str {
    if cfg!(windows) {
        "yt-dlp.exe"
    } else if cfg!(target_os = "macos") {
        "yt-dlp_macos"
    } else {
        "yt-dlp"
    }
}

fn release_url(asset: &str) -> String {
    format!("{RELEASE_BASE}/{asset}")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    ensure_not_root("fetch_ytdlp")?;
    let args = FetchArgs::parse();
    let asset = args
        .asset
        .unwrap_or_else(|| platform_asset().to_string());
    let target = args.dir.join(binary_name());

    let url = release_url(&asset);
    info!(%url, target = %target.display(), "downloading yt-dlp");
    let download_target = target.clone();
    let written = tokio::task::spawn_blocking(move || download_to(&url, &download_target))
        .await
        .context("download task panicked")??;
    info!(bytes = written, "yt-dlp saved");

    let version = YtDlp::new(&target).ensure_available().await?;
    info!(%version, "yt-dlp ready; point MEDIASCOUT_YTDLP at it or keep the default");
    Ok(())
}

/// Streams the asset into `<target>.part` and renames it into place, so a
/// failed download never leaves a truncated executable behind.
fn download_to(url: &str, target: &Path) -> Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let agent = ureq::AgentBuilder::new().timeout(DOWNLOAD_TIMEOUT).build();
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("requesting {url}"))?;
    if response.status() != 200 {
        bail!("unexpected status {} for {url}", response.status());
    }

    let partial = partial_path(target);
    let written = write_body(&mut response.into_reader(), &partial);
    let written = match written {
        Ok(0) => {
            let _ = fs::remove_file(&partial);
            bail!("{url} returned an empty body");
        }
        Ok(bytes) => bytes,
        Err(err) => {
            let _ = fs::remove_file(&partial);
            return Err(err);
        }
    };
    mark_executable(&partial)?;
    fs::rename(&partial, target)
        .with_context(|| format!("moving {} into place", target.display()))?;
    Ok(written)
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}

fn write_body(reader: &mut impl io::Read, path: &Path) -> Result<u64> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let written =
        io::copy(reader, &mut writer).with_context(|| format!("writing {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(written)
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("chmod {}", path.display()))
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> Result<()> {
    Ok(())
}
