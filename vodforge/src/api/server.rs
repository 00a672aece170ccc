//! API server setup and configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::routes;
use crate::config::Settings;
use crate::content::ContentStore;
use crate::coordinator::SessionCoordinator;
use crate::database::repositories::SessionRepository;
use crate::error::Result;
use crate::health::HealthMonitor;

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
            port: 18200,
            enable_cors: true,
        }
    }
}

impl ApiServerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            bind_address: settings.server_host.clone(),
            port: settings.server_port,
            enable_cors: true,
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    /// The transcoding façade
    pub coordinator: Arc<SessionCoordinator>,
    /// Content store for direct serving
    pub content_store: Arc<ContentStore>,
    /// Session repository for scratch fallbacks
    pub sessions: Arc<dyn SessionRepository>,
    /// Health monitor for readiness reporting
    pub health_monitor: Arc<HealthMonitor>,
}

impl AppState {
    pub fn new(
        coordinator: Arc<SessionCoordinator>,
        content_store: Arc<ContentStore>,
        sessions: Arc<dyn SessionRepository>,
        health_monitor: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            start_time: Instant::now(),
            coordinator,
            content_store,
            sessions,
            health_monitor,
        }
    }
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    /// Create with state.
    pub fn with_state(config: ApiServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Get the cancellation token for graceful shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Build the router with all middleware and routes.
    fn build_router(&self) -> Router {
        let mut router = routes::create_router(self.state.clone());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router.layer(TraceLayer::new_for_http())
    }

    /// Start the server and run until cancelled.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| crate::error::Error::config(format!("Invalid address: {e}")))?;

        let router = self.build_router();
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("API server listening on http://{}", addr);

        let cancel_token = self.cancel_token.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down...");
            })
            .await
            .map_err(|e| crate::error::Error::internal(format!("Server error: {e}")))?;

        Ok(())
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
