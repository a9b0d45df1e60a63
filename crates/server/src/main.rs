//! subarea server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use subarea_core::config::AppConfig;
use subarea_osm::{OsmClient, OsmConverter};
use subarea_pipeline::Pipeline;
use subarea_server::{AppState, create_router};
use subarea_storage::ArtifactStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// subaread - serves OSM sub-area boundaries as GeoJSON
#[derive(Parser, Debug)]
#[command(name = "subaread")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (optional; SUBAREA_* env vars override it)
    #[arg(
        short,
        long,
        env = "SUBAREA_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("subaread v{}", env!("CARGO_PKG_VERSION"));

    let mut figment = Figment::new();
    if std::path::Path::new(&args.config).exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}, using defaults", args.config);
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("SUBAREA_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    let warnings = config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;
    for warning in warnings {
        tracing::warn!("{warning}");
    }

    let store = ArtifactStore::new(&config.output.dir)
        .await
        .with_context(|| format!("failed to open output directory {}", config.output.dir.display()))?;
    store
        .health_check()
        .await
        .context("output directory health check failed")?;
    tracing::info!(dir = %store.root().display(), "Artifact store ready");

    let client = OsmClient::new(&config.remote).context("failed to create OSM client")?;
    let pipeline = Pipeline::new(Arc::new(client), Arc::new(OsmConverter), &config.pipeline);

    let state = AppState::new(config.clone(), store, pipeline);

    if let Some(cleanup_interval) = state.rate_limit_cleanup_interval() {
        subarea_server::ratelimit::spawn_cleanup_task(state.rate_limit.clone(), cleanup_interval);
        tracing::info!(
            interval_secs = cleanup_interval.as_secs(),
            "Rate limiter cleanup task spawned"
        );
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    // ConnectInfo is needed for per-IP rate limiting
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
