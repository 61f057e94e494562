#![forbid(unsafe_code)]

//! Runtime settings: CLI overrides > process environment > `.env` file >
//! defaults.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::ytdlp;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 8001;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_WWW_ROOT: &str = "www";
pub const DEFAULT_SCRAPE_TIMEOUT_SECS: u64 = 30;

const HOST_KEY: &str = "MEDIASCOUT_HOST";
const PORT_KEY: &str = "MEDIASCOUT_PORT";
const WWW_ROOT_KEY: &str = "MEDIASCOUT_WWW_ROOT";
const YTDLP_KEY: &str = "MEDIASCOUT_YTDLP";
const CHROME_KEY: &str = "MEDIASCOUT_CHROME";
const SCRAPE_TIMEOUT_KEY: &str = "MEDIASCOUT_SCRAPE_TIMEOUT_SECS";
const ALLOWED_ORIGINS_KEY: &str = "MEDIASCOUT_ALLOWED_ORIGINS";
const LOG_FORMAT_KEY: &str = "MEDIASCOUT_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "plain" | "pretty" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub www_root: PathBuf,
    pub ytdlp: PathBuf,
    pub chrome: Option<PathBuf>,
    pub scrape_timeout: Duration,
    /// Empty means every origin may call the API.
    pub allowed_origins: Vec<String>,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub www_root: Option<PathBuf>,
    pub ytdlp: Option<PathBuf>,
    pub chrome: Option<PathBuf>,
    pub scrape_timeout_secs: Option<u64>,
    pub log_format: Option<LogFormat>,
    pub env_path: Option<PathBuf>,
}

pub fn load_settings(overrides: SettingsOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    Ok(build_settings(&file_vars, env_var_string, overrides))
}

fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Settings {
    let lookup = |key: &str| {
        env_lookup(key)
            .or_else(|| file_vars.get(key).cloned())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup(HOST_KEY))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| lookup(PORT_KEY).and_then(|value| value.parse().ok()))
        .unwrap_or(DEFAULT_PORT);
    let www_root = overrides
        .www_root
        .or_else(|| lookup(WWW_ROOT_KEY).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WWW_ROOT));
    let ytdlp = overrides
        .ytdlp
        .or_else(|| lookup(YTDLP_KEY).map(PathBuf::from))
        .unwrap_or_else(ytdlp::default_binary);
    let chrome = overrides
        .chrome
        .or_else(|| lookup(CHROME_KEY).map(PathBuf::from));
    let scrape_timeout_secs = overrides
        .scrape_timeout_secs
        .or_else(|| lookup(SCRAPE_TIMEOUT_KEY).and_then(|value| value.parse().ok()))
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_SCRAPE_TIMEOUT_SECS);
    let allowed_origins = lookup(ALLOWED_ORIGINS_KEY)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();
    let log_format = overrides
        .log_format
        .or_else(|| lookup(LOG_FORMAT_KEY).and_then(|value| LogFormat::parse(&value)))
        .unwrap_or_default();

    Settings {
        host,
        port,
        www_root,
        ytdlp,
        chrome,
        scrape_timeout: Duration::from_secs(scrape_timeout_secs),
        allowed_origins,
        log_format,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Reads `KEY=value` lines. Supports `export` prefixes, `#` comments and
/// single or double quoted values. A missing file yields no values.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        vars.insert(key.to_string(), unquote(raw.trim()).to_string());
    }
    Ok(vars)
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .iter()
        .find_map(|quote| {
            value
                .strip_prefix(*quote)
                .and_then(|inner| inner.strip_suffix(*quote))
        })
        .unwrap_or(value)
}
