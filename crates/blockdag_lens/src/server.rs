//! HTTP server wiring: configuration, middleware and lifecycle.

use crate::api::{create_router, ApiState};
use crate::error::{Error, Result};

use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Configuration for the BlockDAG Lens server.
#[derive(Debug, Clone)]
pub struct LensConfig {
    /// The host address to bind the server to (e.g., "127.0.0.1").
    pub host: String,
    /// The port to listen on.
    pub port: u16,
    /// Allow any origin, so a dashboard served elsewhere can call the API.
    pub enable_cors: bool,
    /// Log every HTTP request through `tower-http`'s trace layer.
    pub enable_tracing: bool,
}

impl Default for LensConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            enable_cors: true,
            enable_tracing: true,
        }
    }
}

impl LensConfig {
    /// Listens on every interface with CORS and request tracing on.
    pub fn development() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            ..Default::default()
        }
    }

    /// Loopback only, without CORS or request tracing.
    pub fn production() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            enable_cors: false,
            enable_tracing: false,
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))
    }
}

/// The BlockDAG Lens server.
pub struct LensServer {
    config: LensConfig,
    state: ApiState,
}

impl LensServer {
    pub fn new(config: LensConfig, state: ApiState) -> Self {
        Self { config, state }
    }

    pub fn config(&self) -> &LensConfig {
        &self.config
    }

    pub fn state(&self) -> &ApiState {
        &self.state
    }

    /// The router with the configured middleware applied.
    pub fn router(&self) -> Router {
        let mut app = create_router(self.state.clone());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            app = app.layer(cors);
        }

        if self.config.enable_tracing {
            app = app.layer(TraceLayer::new_for_http());
        }

        app
    }

    /// Binds the configured address and serves until `shutdown_signal` resolves.
    pub async fn start_with_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Server(format!("Failed to bind: {}", e)))?;

        self.serve(listener, shutdown_signal).await
    }

    /// Serves on an already-bound listener until `shutdown_signal` resolves.
    ///
    /// Every live-feed session is closed once the server has stopped.
    pub async fn serve<F>(self, listener: TcpListener, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        let app = self.router();

        log::info!("Starting BlockDAG Lens server on http://{}", addr);
        log::info!("  - Upstream:  {}", self.state.client.base_url());
        log::info!("  - API:       http://{}/api/blocks", addr);
        log::info!("  - Layout:    http://{}/api/dag/layout", addr);
        log::info!("  - WebSocket: ws://{}/ws", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| Error::Server(format!("Server error: {}", e)))?;

        self.state.feed.registry().close_all().await;
        log::info!("Server shutdown complete");
        Ok(())
    }
}
