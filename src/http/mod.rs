//! HTTP API: backup listing, manual runs, downloads and health.

use crate::app::App;
use crate::scheduler::BackupScheduler;
use crate::Result;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

mod auth;
mod error;
mod routes;

pub use auth::API_KEY_HEADER;
pub use error::ApiError;

/// Routes under `/api` require a configured API key
pub fn router(app: Arc<App>) -> Router {
    let api = Router::new()
        .route(
            "/backups",
            get(routes::list_backups).post(routes::start_backup),
        )
        .route(
            "/backups/{id}/generate-download-url",
            get(routes::generate_download_url),
        )
        .route("/backups/{id}/download", get(routes::download))
        .route("/health", get(routes::health))
        .layer(from_fn_with_state(app.clone(), auth::require_api_key));

    Router::new()
        .route("/ping", get(routes::ping))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

/// Serve the API on `port` until Ctrl+C or SIGTERM.
///
/// With a `backup_job` cron expression the scheduler runs alongside and is
/// stopped once the server has drained.
pub async fn serve(app: Arc<App>, port: u16, backup_job: Option<&str>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = match backup_job {
        Some(expression) => Some(BackupScheduler::spawn(
            app.clone(),
            expression,
            shutdown_rx,
        )?),
        None => None,
    };

    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    info!("Server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    let _ = shutdown_tx.send(true);
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            error!("Backup scheduler task failed: {}", e);
        }
    }
    Ok(())
}

/// Waits for Ctrl+C, or SIGTERM on Unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let terminate = async {
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
            } else {
                error!("Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
