//! API server setup and configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::Result;
use crate::api::routes;
use crate::config::IngestConfig;
use crate::manager::StreamManager;
use crate::relay::RelaySupervisor;
use crate::thumbnail::ThumbnailService;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8090,
            enable_cors: true,
        }
    }
}

impl ApiServerConfig {
    /// Load API server config from environment variables, falling back to
    /// defaults.
    ///
    /// Supported env vars: `API_BIND_ADDRESS`, `API_PORT`.
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(bind_address) = std::env::var("API_BIND_ADDRESS")
            && !bind_address.trim().is_empty()
        {
            config.bind_address = bind_address;
        }

        if let Ok(port) = std::env::var("API_PORT")
            && let Ok(parsed) = port.parse::<u16>()
        {
            config.port = parsed;
        }

        config
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    /// Stream lifecycle manager
    pub manager: Arc<StreamManager>,
    /// Relay supervisor, for per-destination runtime status
    pub supervisor: Arc<RelaySupervisor>,
    /// Thumbnail generator
    pub thumbnails: Arc<ThumbnailService>,
    /// Ingest configuration, for building public ingest URLs
    pub ingest: IngestConfig,
}

/// Build the application router.
pub fn build_router(state: AppState, enable_cors: bool) -> Router {
    let mut router = Router::new()
        .nest("/api/streams", routes::streams::router())
        .nest("/api/health", routes::health::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}

/// Run the API server until the cancellation token fires.
pub async fn run_server(
    config: ApiServerConfig,
    state: AppState,
    cancellation_token: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .map_err(|e| crate::Error::config(format!("invalid bind address: {}", e)))?;

    let router = build_router(state, config.enable_cors);
    let listener = TcpListener::bind(addr).await?;
    info!("API server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancellation_token.cancelled().await })
        .await?;

    info!("API server stopped");
    Ok(())
}
