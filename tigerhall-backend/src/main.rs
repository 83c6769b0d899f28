use tigerhall_backend::config::BackendConfig;
use tigerhall_backend::logging;
use tigerhall_backend::module::{
    FsImageStore, LogNotifier, MemoryRepository, NotificationDispatcher, SightingIngestor,
    SightingRepository,
};
use tigerhall_backend::service::{self, AppState};

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = BackendConfig::load()?;

    // Initialize logging
    let _logging_guard = logging::init_logging(&config.log_dir, "tigerhall-backend", &config.log_level)?;

    info!("Tigerhall backend starting...");
    info!("Server will listen on {}", config.server_address());
    info!("Images are stored under {}", config.image_storage_path);

    let repository: Arc<dyn SightingRepository> = match config.snapshot_path() {
        Some(path) => {
            info!("Using repository snapshot {:?}", path);
            Arc::new(MemoryRepository::open(&path).await?)
        }
        None => {
            warn!("Snapshot persistence disabled, sightings are kept in memory only");
            Arc::new(MemoryRepository::new())
        }
    };

    let images = Arc::new(FsImageStore::new(&config.image_storage_path));
    let dispatcher = Arc::new(NotificationDispatcher::start(
        config.notification_queue_capacity,
        Arc::new(LogNotifier),
    ));

    let ingestor = SightingIngestor::new(repository, images, dispatcher.clone())
        .with_subject_serialization(config.serialize_per_subject);

    let address = config.server_address();
    let app = service::router(AppState::new(ingestor, config));

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("HTTP server listening on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped");
    let stats = dispatcher.shutdown().await;
    if stats.failed > 0 || stats.dropped > 0 {
        warn!(
            failed = stats.failed,
            dropped = stats.dropped,
            "Some notifications were not delivered"
        );
    }

    info!("Tigerhall backend shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
