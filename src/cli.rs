//! Command-line interface for the market proxy
//!
//! This module parses CLI arguments with clap and folds them over the values
//! from the configuration file, so a flag always wins over the file.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::{validate_upstream_url, Config, ConfigError};

/// MineOS App Market caching proxy
#[derive(Parser, Debug)]
#[command(name = "marketproxy")]
#[command(about = "Caching proxy for the MineOS App Market API")]
#[command(version)]
pub struct Cli {
    /// Path to the configuration file (written with defaults if missing)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Bind to 127.0.0.1 instead of all interfaces
    #[arg(long)]
    pub local: bool,

    /// Directory cache records are stored in
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Seconds a cached record stays fresh (0 means always refetch)
    #[arg(long, value_name = "SECONDS")]
    pub ttl_seconds: Option<u64>,

    /// Base URL of the upstream market API
    #[arg(long, value_name = "URL")]
    pub upstream_url: Option<String>,
}

/// Loads the configuration file and applies command-line overrides
pub fn resolve_config(cli: &Cli) -> Result<Config, ConfigError> {
    let mut config = Config::load_or_init(cli.config.clone())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.local {
        config.bind = IpAddr::V4(Ipv4Addr::LOCALHOST);
    }
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(ttl) = cli.ttl_seconds {
        config.ttl = Duration::from_secs(ttl);
    }
    if let Some(url) = &cli.upstream_url {
        config.upstream_url = validate_upstream_url(url)?;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed_config(temp_dir: &TempDir) -> PathBuf {
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[server]\nport = 1111\n\n[cache]\ndirectory = \"/tmp/proxy-cache\"\n",
        )
        .expect("Failed to seed config");
        path
    }

    #[test]
    fn test_cli_parse_no_args() {
        let cli = Cli::parse_from(["marketproxy"]);

        assert!(cli.config.is_none());
        assert!(cli.port.is_none());
        assert!(!cli.local);
        assert!(cli.cache_dir.is_none());
        assert!(cli.ttl_seconds.is_none());
        assert!(cli.upstream_url.is_none());
    }

    #[test]
    fn test_cli_parse_all_flags() {
        let cli = Cli::parse_from([
            "marketproxy",
            "--config",
            "/etc/marketproxy.toml",
            "--port",
            "8080",
            "--local",
            "--cache-dir",
            "/var/cache/proxy",
            "--ttl-seconds",
            "0",
            "--upstream-url",
            "http://example.com/api",
        ]);

        assert_eq!(
            cli.config.as_deref(),
            Some(std::path::Path::new("/etc/marketproxy.toml"))
        );
        assert_eq!(cli.port, Some(8080));
        assert!(cli.local);
        assert_eq!(
            cli.cache_dir.as_deref(),
            Some(std::path::Path::new("/var/cache/proxy"))
        );
        assert_eq!(cli.ttl_seconds, Some(0));
        assert_eq!(cli.upstream_url.as_deref(), Some("http://example.com/api"));
    }

    #[test]
    fn test_resolve_config_uses_file_values() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = seed_config(&temp_dir);

        let cli = Cli::parse_from([
            "marketproxy",
            "--config",
            path.to_str().expect("Path should be UTF-8"),
        ]);
        let config = resolve_config(&cli).expect("Failed to resolve config");

        assert_eq!(config.port, 1111);
        assert_eq!(config.bind, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn test_flags_override_file_values() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = seed_config(&temp_dir);

        let cli = Cli::parse_from([
            "marketproxy",
            "--config",
            path.to_str().expect("Path should be UTF-8"),
            "--port",
            "2222",
            "--local",
            "--ttl-seconds",
            "30",
        ]);
        let config = resolve_config(&cli).expect("Failed to resolve config");

        assert_eq!(config.port, 2222);
        assert_eq!(config.bind, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.ttl, Duration::from_secs(30));
    }

    #[test]
    fn test_cache_dir_override() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = seed_config(&temp_dir);

        let cli = Cli::parse_from([
            "marketproxy",
            "--config",
            path.to_str().expect("Path should be UTF-8"),
            "--cache-dir",
            "/elsewhere",
        ]);
        let config = resolve_config(&cli).expect("Failed to resolve config");

        assert_eq!(config.cache_dir, PathBuf::from("/elsewhere"));
    }

    #[test]
    fn test_invalid_upstream_url_override_fails() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = seed_config(&temp_dir);

        let cli = Cli::parse_from([
            "marketproxy",
            "--config",
            path.to_str().expect("Path should be UTF-8"),
            "--upstream-url",
            "not a url",
        ]);

        match resolve_config(&cli) {
            Err(ConfigError::InvalidUpstreamUrl(url)) => assert_eq!(url, "not a url"),
            other => panic!("Expected InvalidUpstreamUrl, got {:?}", other),
        }
    }
}
