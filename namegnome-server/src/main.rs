//! # NameGnome Server
//!
//! REST surface over the scan/plan/apply pipeline. Media libraries are
//! scanned into immutable snapshots, planned against provider metadata
//! (TVDB/TMDB/MusicBrainz with fallbacks) and applied with per-root locking
//! and rollback manifests. Long-running runs stream progress over SSE.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use namegnome_config::Config;
use namegnome_server::routes::create_router;
use namegnome_server::state::AppState;

/// Command line arguments for the NameGnome server
#[derive(Parser, Debug)]
#[command(name = "namegnome-server")]
#[command(about = "Media rename planning service (scan/plan/apply)")]
struct Args {
    /// Server port
    #[arg(short, long, env = "NAMEGNOME_PORT", default_value_t = 8094)]
    port: u16,

    /// Server host
    #[arg(long, env = "NAMEGNOME_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Cache database path (overrides config)
    #[arg(long, env = "NAMEGNOME_CACHE_PATH")]
    cache_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load()?;
    if let Some(cache_path) = args.cache_path {
        config.cache_path = cache_path;
    }

    let default_filter = if config.debug {
        "namegnome_server=debug,namegnome_core=debug,tower_http=debug"
    } else {
        "namegnome_server=info,namegnome_core=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(err) = config.validate_online() {
        warn!(%err, "provider keys missing; only offline planning will work");
    }

    let state = AppState::build(config).await?;
    let router = create_router(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    info!(%addr, "namegnome-server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}
