use std::net::SocketAddr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vitals::config::ServerConfig;
use vitals::http::{AppState, router};
use vitals::storage::VitalStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vitals=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: data_directory={}, listen_port={}, max_degree={}",
        config.data_directory.display(),
        config.listen_port,
        config.max_degree
    );

    if let Err(e) = std::fs::create_dir_all(&config.data_directory) {
        tracing::error!("Failed to create data directory: {e}");
        std::process::exit(1);
    }

    let base_path = config.store_base_path();
    let store = match VitalStore::open(&base_path, config.max_degree) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open vital store {}: {e}", base_path.display());
            std::process::exit(1);
        }
    };
    tracing::info!(
        "Vital store ready: {} ({} records)",
        base_path.display(),
        store.record_count()
    );

    let state = AppState::new(store);
    #[allow(clippy::disallowed_methods)] // Clone needed to sync the store after shutdown
    let app = router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind: {e}");
            std::process::exit(1);
        });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Server error: {e}");
            std::process::exit(1);
        });

    if let Err(e) = state.sync().await {
        tracing::error!("Failed to sync vital store on shutdown: {e}");
        std::process::exit(1);
    }
    tracing::info!("vital store synced, shutting down");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
