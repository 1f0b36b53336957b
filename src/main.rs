//! Caching reverse proxy for the MineOS App Market
//!
//! Persists every upstream response on disk so the market stays browsable
//! when the upstream is slow or unreachable.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use marketproxy::cli::{self, Cli};
use marketproxy::freshness::FreshnessPolicy;
use marketproxy::proxy::ProxyCoordinator;
use marketproxy::server::{self, AppState};
use marketproxy::store::CacheStore;
use marketproxy::upstream::MarketClient;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "marketproxy=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "Market proxy exited");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = cli::resolve_config(cli)?;

    let store = CacheStore::open(&config.cache_dir)?;
    info!(
        directory = %config.cache_dir.display(),
        ttl_seconds = config.ttl.as_secs(),
        "Opened cache store"
    );

    let client = MarketClient::new(config.upstream_url.clone(), config.upstream_timeout)?;
    info!(upstream = %config.upstream_url, "Proxying the market API");

    let coordinator =
        ProxyCoordinator::new(store, FreshnessPolicy::new(config.ttl), Arc::new(client));

    let addr = SocketAddr::new(config.bind, config.port);
    server::run(addr, Arc::new(AppState::new(coordinator))).await?;

    Ok(())
}
