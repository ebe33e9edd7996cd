//! Web UI and JSON API over the pipeline (feature `server`).
//!
//! Each upload becomes a background run tracked in [`AppState`]. Clients poll
//! `GET /api/runs/:id` for the live stage and download the report once it is
//! done. Uploads above the body limit are refused with 413 before any run is
//! created; unsupported types get 415.

pub mod handlers;
pub mod state;

pub use state::{AppState, RunHandle, RunProgress};

use crate::config::PipelineConfig;
use crate::error::ScanbriefError;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Default listening port (overridden by `PORT`).
pub const DEFAULT_PORT: u16 = 8080;

/// Default upload size limit: 20 MiB.
pub const DEFAULT_UPLOAD_LIMIT: usize = 20 * 1024 * 1024;

/// Where and how to listen.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Maximum request body size in bytes.
    pub upload_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            upload_limit: DEFAULT_UPLOAD_LIMIT,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Build the application router.
pub fn router(state: AppState, upload_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/api/templates", get(handlers::list_templates))
        .route("/api/runs", post(handlers::create_run))
        .route(
            "/api/runs/:id",
            get(handlers::get_run).delete(handlers::delete_run),
        )
        .route("/api/runs/:id/result", get(handlers::get_result))
        .route("/api/runs/:id/report", get(handlers::get_report))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve until Ctrl+C or SIGTERM.
pub async fn serve(server: &ServerConfig, pipeline: PipelineConfig) -> Result<(), ScanbriefError> {
    let addr = server.addr();
    let app = router(AppState::new(pipeline), server.upload_limit);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ScanbriefError::Internal(format!("cannot listen on {addr}: {e}")))?;
    info!("scanbrief listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ScanbriefError::Internal(format!("server error: {e}")))?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
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
