use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use slidewin::config::{SlidewinConfig, StoreBackend};
use slidewin::http::HttpServer;
use slidewin::ratelimit::SlidingWindowLimiter;
use slidewin::store::{InMemoryStore, RedisStore, WindowStore};

/// Rate limited HTTP front backed by a shared sliding window log.
#[derive(Debug, Parser)]
#[command(name = "slidewin", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Override the Redis URL
    #[arg(long)]
    redis_url: Option<String>,

    /// Keep window records in process memory instead of Redis
    #[arg(long)]
    memory_store: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!("Starting Slidewin Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => SlidewinConfig::from_file(path)?,
        None => SlidewinConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.server.http_addr = listen;
    }
    if let Some(url) = args.redis_url {
        config.store.url = url;
    }
    if args.memory_store {
        config.store.backend = StoreBackend::Memory;
    }
    config.validate()?;

    info!(
        http_addr = %config.server.http_addr,
        backend = ?config.store.backend,
        window_secs = config.rate_limiting.window_size_secs,
        max_requests = config.rate_limiting.max_requests_per_window,
        log_interval_secs = config.rate_limiting.log_interval_secs,
        "Configuration loaded"
    );

    match config.store.backend {
        StoreBackend::Redis => {
            let store = RedisStore::connect(
                &config.store.url,
                config.store.key_prefix.clone(),
                config.store.timeout(),
            )
            .await?;
            info!(url = %config.store.url, "Connected to shared store");
            run(&config, Arc::new(store)).await
        }
        StoreBackend::Memory => {
            info!("Using in-process store; limits are not shared between instances");
            run(&config, Arc::new(InMemoryStore::new())).await
        }
    }
}

async fn run<S: WindowStore + 'static>(config: &SlidewinConfig, store: Arc<S>) -> anyhow::Result<()> {
    let limiter = Arc::new(SlidingWindowLimiter::new(store, config.window_policy())?);
    info!("Rate limiter initialized");

    HttpServer::new(config.server.http_addr, limiter.clone())
        .serve_with_shutdown(shutdown_signal())
        .await?;

    let stats = limiter.stats();
    info!(
        allowed = stats.allowed,
        denied = stats.denied,
        store_unavailable = stats.store_unavailable,
        malformed_records = stats.malformed_records,
        "Slidewin Rate Limiting Service stopped"
    );
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
