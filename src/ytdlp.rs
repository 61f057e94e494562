#![forbid(unsafe_code)]

//! Thin handle around the yt-dlp executable.
//!
//! Both the metadata lookup and the streaming relay spawn the same binary, so
//! the path resolution and the startup probe live here.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::{Context, Result, bail};
use tokio::process::Command;
use tracing::info;

/// Directory the installer drops the binary into, relative to the working
/// directory.
pub const LOCAL_TOOL_DIR: &str = "yt-dlp-bin";

/// Binary name on the current platform.
pub fn binary_name() -> &'static str {
    if cfg!(windows) { "yt-dlp.exe" } else { "yt-dlp" }
}

/// Prefers the locally installed copy and falls back to whatever `yt-dlp`
/// resolves to on `PATH`.
pub fn default_binary() -> PathBuf {
    let local = Path::new(LOCAL_TOOL_DIR).join(binary_name());
    if local.is_file() {
        local
    } else {
        PathBuf::from(binary_name())
    }
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: PathBuf,
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Fresh command with stdin closed. Dropping the child kills the process,
    /// which is what makes an abandoned download stop the tool.
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command.stdin(Stdio::null()).kill_on_drop(true);
        command
    }

    /// Runs `<tool> --version` so a missing or broken install fails loudly at
    /// startup instead of on the first request.
    pub async fn ensure_available(&self) -> Result<String> {
        let output = self
            .command()
            .arg("--version")
            .output()
            .await
            .with_context(|| format!("launching {}", self.binary.display()))?;
        if !output.status.success() {
            bail!(
                "{} --version exited with {}",
                self.binary.display(),
                output.status
            );
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(binary = %self.binary.display(), %version, "yt-dlp available");
        Ok(version)
    }
}

/// Last non-empty line of a tool's stderr, which is where yt-dlp prints the
/// actual `ERROR:` message.
pub fn last_error_line(stderr: &str) -> Option<&str> {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
}
