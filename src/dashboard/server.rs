//! Control API HTTP server with axum router and graceful shutdown.

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::error::DashboardError;
use super::handlers::{
    create_stream, delete_stream, get_history, get_logs, get_metrics, get_stream, list_streams,
    post_start, post_stop, AppState,
};
use crate::config::DashboardSection;

/// Default port for the control API.
pub const DEFAULT_PORT: u16 = 8080;

/// Configuration for the dashboard server.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Port to listen on.
    pub port: u16,
    /// Host address to bind to.
    pub host: String,
    /// Whether to enable permissive CORS.
    pub cors_permissive: bool,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: "127.0.0.1".to_string(),
            cors_permissive: true,
        }
    }
}

impl From<&DashboardSection> for DashboardConfig {
    fn from(section: &DashboardSection) -> Self {
        Self {
            port: section.port,
            host: section.host.clone(),
            cors_permissive: section.cors_permissive,
        }
    }
}

/// HTTP server exposing the stream registry.
pub struct DashboardServer {
    config: DashboardConfig,
    state: AppState,
}

impl DashboardServer {
    /// Create a new server with default configuration.
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self {
            config: DashboardConfig::default(),
            state,
        }
    }

    /// Set the server configuration (builder pattern).
    #[must_use]
    pub fn with_config(mut self, config: DashboardConfig) -> Self {
        self.config = config;
        self
    }

    /// Get the configured address as a string.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Build the axum router with all routes and middleware.
    pub fn build_router(&self) -> Router {
        let router = Router::new()
            .route("/api/streams", get(list_streams).post(create_stream))
            .route("/api/streams/:id", get(get_stream).delete(delete_stream))
            .route("/api/streams/:id/metrics", get(get_metrics))
            .route("/api/streams/:id/history", get(get_history))
            .route("/api/streams/:id/logs", get(get_logs))
            .route("/api/streams/:id/start", post(post_start))
            .route("/api/streams/:id/stop", post(post_stop))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.config.cors_permissive {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Run the server until `cancel` is triggered, then shut down gracefully.
    ///
    /// Streams are left running; stopping them is the caller's business.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or serve.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DashboardError> {
        let addr = self.address();
        let app = self.build_router();

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| DashboardError::BindError {
                address: addr.clone(),
                source,
            })?;
        tracing::info!(address = %addr, "Control API listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                tracing::info!("Control API shutting down gracefully");
            })
            .await?;
        Ok(())
    }
}
