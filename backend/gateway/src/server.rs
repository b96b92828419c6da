//! Main HTTP Gateway Server.
//!
//! Exposes the plugin manager over REST; every route maps 1:1 to a manager
//! facade operation.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, instrument};

use persona_plugins::PluginManager;

use crate::plugins_api;

/// Application state shared across routes.
#[derive(Clone)]
pub struct GatewayState {
    pub manager: Arc<PluginManager>,
}

/// Build the gateway router.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route(
            "/api/plugins",
            post(plugins_api::install).get(plugins_api::list),
        )
        .route(
            "/api/plugins/:name",
            get(plugins_api::get).delete(plugins_api::uninstall),
        )
        .route("/api/plugins/:name/reload", post(plugins_api::reload))
        .route("/api/health", get(|| async { "OK" }))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Starts the main Axum HTTP server for the gateway.
#[instrument(skip(state))]
pub async fn start_server(addr: SocketAddr, state: GatewayState) -> Result<()> {
    let app = router(state);

    info!("Gateway HTTP server listening on {}", addr);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
