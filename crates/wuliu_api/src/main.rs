use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use wuliu_api::broadcast::Broadcaster;
use wuliu_api::config::Config;
use wuliu_api::hub::{StationHub, run_pipeline};
use wuliu_api::{AppState, create_app, mqtt};
use wuliu_store::SqliteRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments and environment
    let config = Config::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // A database that cannot be opened or migrated is fatal
    let repository = SqliteRepository::open(&config.db_path, config.db_pool_size, config.db_timeout())
        .with_context(|| format!("failed to initialise database '{}'", config.db_path.display()))?;

    let hub = Arc::new(StationHub::new(
        Arc::new(repository),
        Broadcaster::new(config.broadcast_capacity),
        config.db_timeout(),
    ));

    // Broker loop and pipeline are joined by a bounded queue
    let (ingress_tx, ingress_rx) = mpsc::channel(config.ingress_queue.max(1));
    tokio::spawn(run_pipeline(Arc::clone(&hub), ingress_rx));
    tokio::spawn(mqtt::run(config.clone(), ingress_tx));

    // Build our application with routes
    let app = create_app(AppState::new(hub), config.static_dir.as_deref());

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;
    tracing::info!("Dashboard listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Dashboard stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutting down");
}
