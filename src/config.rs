//! Configuration loading and validation
//!
//! Settings come from a TOML file that is written with commented defaults on
//! first run, then overridden by command-line flags. Every value is validated
//! here so that a bad configuration stops the server at startup instead of
//! surfacing mid-request.

use std::net::{AddrParseError, IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::freshness::DEFAULT_TTL;
use crate::upstream::DEFAULT_BASE_URL;

/// Default listen port, matching the classic proxy deployments
pub const DEFAULT_PORT: u16 = 3004;

/// Default upstream request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Errors that make the configuration unusable
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot determine the user configuration directory")]
    NoProjectDirs,

    #[error("Failed to read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write default configuration file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("cache.ttl_seconds must not be negative (got {0})")]
    NegativeTtl(i64),

    #[error("upstream.base_url is not a valid URL: {0:?}")]
    InvalidUpstreamUrl(String),

    #[error("Invalid server.bind address {value:?}: {source}")]
    InvalidBind {
        value: String,
        source: AddrParseError,
    },
}

/// Raw configuration file model; every field is optional
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    cache: CacheSection,
    #[serde(default)]
    upstream: UpstreamSection,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    port: Option<u16>,
    bind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CacheSection {
    directory: Option<PathBuf>,
    // Read as a signed value so a negative TTL is rejected with a clear
    // error instead of a type mismatch
    ttl_seconds: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct UpstreamSection {
    base_url: Option<String>,
    timeout_seconds: Option<u64>,
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the proxy listens on
    pub port: u16,
    /// Address the proxy binds to
    pub bind: IpAddr,
    /// Directory cache records are stored in
    pub cache_dir: PathBuf,
    /// How long a cached record stays fresh
    pub ttl: Duration,
    /// Base URL of the upstream market API
    pub upstream_url: String,
    /// Upstream request timeout
    pub upstream_timeout: Duration,
}

impl Config {
    /// Loads the configuration file, writing commented defaults on first run
    ///
    /// With no explicit path the file lives in the user configuration
    /// directory (`~/.config/marketproxy/config.toml` on Linux).
    pub fn load_or_init(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path,
            None => default_config_path()?,
        };

        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                    path: path.clone(),
                    source,
                })?;
            }
            std::fs::write(&path, default_config_toml()).map_err(|source| {
                ConfigError::Write {
                    path: path.clone(),
                    source,
                }
            })?;
            info!(path = %path.display(), "Wrote default configuration file");
        }

        info!(path = %path.display(), "Reading configuration file");
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let file: ConfigFile =
            toml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })?;

        Self::resolve(file)
    }

    /// Fills in defaults and validates the raw file model
    fn resolve(file: ConfigFile) -> Result<Self, ConfigError> {
        let bind = match file.server.bind {
            Some(value) => value
                .parse()
                .map_err(|source| ConfigError::InvalidBind { value, source })?,
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };

        let ttl_seconds = file.cache.ttl_seconds.unwrap_or(DEFAULT_TTL.as_secs() as i64);
        if ttl_seconds < 0 {
            return Err(ConfigError::NegativeTtl(ttl_seconds));
        }

        let cache_dir = match file.cache.directory {
            Some(dir) => dir,
            None => default_cache_dir()?,
        };

        let upstream_url = validate_upstream_url(
            file.upstream
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_BASE_URL),
        )?;

        Ok(Self {
            port: file.server.port.unwrap_or(DEFAULT_PORT),
            bind,
            cache_dir,
            ttl: Duration::from_secs(ttl_seconds as u64),
            upstream_url,
            upstream_timeout: Duration::from_secs(
                file.upstream.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
        })
    }
}

/// Checks that an upstream base URL is absolute and well-formed
pub fn validate_upstream_url(url: &str) -> Result<String, ConfigError> {
    reqwest::Url::parse(url).map_err(|_| ConfigError::InvalidUpstreamUrl(url.to_string()))?;
    Ok(url.to_string())
}

fn default_config_path() -> Result<PathBuf, ConfigError> {
    let dirs = ProjectDirs::from("", "", "marketproxy").ok_or(ConfigError::NoProjectDirs)?;
    Ok(dirs.config_dir().join("config.toml"))
}

fn default_cache_dir() -> Result<PathBuf, ConfigError> {
    let dirs = ProjectDirs::from("", "", "marketproxy").ok_or(ConfigError::NoProjectDirs)?;
    Ok(dirs.cache_dir().to_path_buf())
}

fn default_config_toml() -> String {
    format!(
        r#"# Market proxy configuration.

[server]
# Port the proxy listens on.
# You might want to consider changing this to 80.
port = {port}

# Address to bind. Defaults to all interfaces.
#bind = "0.0.0.0"

[cache]
# Directory records are stored in. Defaults to the user cache directory.
#directory = "/var/cache/marketproxy"

# Seconds a record stays fresh. 0 means always refetch.
ttl_seconds = {ttl}

[upstream]
# Base URL of the live market API.
base_url = "{base_url}"

# Seconds before an upstream request times out.
timeout_seconds = {timeout}
"#,
        port = DEFAULT_PORT,
        ttl = DEFAULT_TTL.as_secs(),
        base_url = DEFAULT_BASE_URL,
        timeout = DEFAULT_TIMEOUT_SECS,
    )
}
