mod cache;
mod config;
mod error;
mod forge;
mod health;
mod http;
mod index;
mod metrics;
mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::cache::{CacheStore, Refresher};
use crate::config::{Config, RefreshMode};
use crate::forge::rate_limit::RateLimitState;
use crate::index::{IndexBuilder, Snapshot};
use crate::metrics::MetricsRegistry;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "releasecache", about = "Release package directory backed by S3")]
struct Cli {
    /// Path to the YAML configuration file.  Without one, settings come from
    /// built-in defaults and the environment.
    #[arg(short, long, env = "RELEASECACHE_CONFIG")]
    config: Option<String>,
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Global state shared across all request handlers and background tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Live index snapshot read by every request.
    pub cache: Arc<CacheStore>,
    pub refresher: Arc<Refresher>,
    pub metrics: MetricsRegistry,
    pub rate_limit: RateLimitState,
}

// ---------------------------------------------------------------------------
// S3 client setup
// ---------------------------------------------------------------------------

async fn build_s3_client(config: &Config) -> Result<aws_sdk_s3::Client> {
    let storage = &config.storage;
    let mut aws_config_loader =
        aws_config::from_env().region(aws_config::Region::new(storage.region.clone()));

    if let (Some(key), Some(secret)) = (&storage.access_key_id, &storage.secret_access_key) {
        aws_config_loader = aws_config_loader.credentials_provider(
            aws_sdk_s3::config::Credentials::new(key, secret, None, None, "releasecache-config"),
        );
    }

    let aws_config = aws_config_loader.load().await;

    let mut s3_config =
        aws_sdk_s3::config::Builder::from(&aws_config).force_path_style(storage.force_path_style);
    if let Some(endpoint) = &storage.endpoint_url {
        s3_config = s3_config.endpoint_url(endpoint);
    }

    let client = aws_sdk_s3::Client::from_conf(s3_config.build());
    tracing::info!(
        bucket = %storage.bucket,
        region = %storage.region,
        endpoint = storage.endpoint_url.as_deref().unwrap_or("default"),
        "S3 client initialised"
    );
    Ok(client)
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(state: AppState) -> Result<()> {
    let app = http::handler::create_router(Arc::new(state.clone()));

    let listen_addr: std::net::SocketAddr = state
        .config
        .server
        .http_listen
        .parse()
        .context("invalid http_listen address")?;

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Config ----
    let config = config::load_config(cli.config.as_deref())?;
    let config = Arc::new(config);

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(
        config_path = cli.config.as_deref().unwrap_or("<none>"),
        repo = %config.upstream.repo,
        "starting releasecache"
    );

    // ---- Infrastructure clients ----
    let s3 = build_s3_client(&config).await?;

    let http_client = reqwest::Client::builder()
        .user_agent(concat!("releasecache/", env!("CARGO_PKG_VERSION")))
        .timeout(config.upstream.request_timeout())
        .build()
        .context("failed to build reqwest client")?;

    // ---- Metrics ----
    let metrics = MetricsRegistry::new();
    let rate_limit = RateLimitState::new();

    // ---- Index pipeline ----
    let tags = forge::build_tag_source(&config, http_client, rate_limit.clone(), metrics.clone());
    let packages = Arc::new(storage::S3Storage::new(s3, config.storage.bucket.clone()));
    let builder = IndexBuilder::new(tags, packages, config.storage.prefix.clone());

    let cache = Arc::new(CacheStore::new(Snapshot::empty()));
    let refresher = Arc::new(Refresher::new(
        builder,
        Arc::clone(&cache),
        config.refresh.interval(),
        metrics.clone(),
    ));

    // ---- Initial build ----
    refresher
        .refresh_now()
        .await
        .context("initial index build failed")?;

    // ---- Background refresh ----
    if config.refresh.mode == RefreshMode::Interval {
        tokio::spawn(Arc::clone(&refresher).run_periodic());
    }

    // ---- App state ----
    let state = AppState {
        config: Arc::clone(&config),
        cache,
        refresher,
        metrics,
        rate_limit,
    };

    run_http_server(state).await
}
