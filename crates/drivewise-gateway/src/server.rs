//! HTTP server implementation using Axum.

use axum::{
    Router,
    routing::{get, post},
};
use drivewise_core::config::GatewayConfig;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub gateway_config: GatewayConfig,
    pub start_time: std::time::Instant,
    /// The question router; shared by every request.
    pub router: Arc<drivewise_agent::Router>,
}

impl AppState {
    pub fn new(gateway_config: GatewayConfig, router: Arc<drivewise_agent::Router>) -> Self {
        Self {
            gateway_config,
            start_time: std::time::Instant::now(),
            router,
        }
    }
}

fn cors_layer() -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    // Example: DRIVEWISE_CORS_ORIGINS=https://dealer.example.com,https://intranet.example.com
    if let Ok(origins_str) = std::env::var("DRIVEWISE_CORS_ORIGINS") {
        let origins: Vec<_> = origins_str
            .split(',')
            .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
            .collect();
        cors.allow_origin(origins)
    } else {
        cors.allow_origin(Any)
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(super::routes::health_check))
        .route("/api/v1/chat", post(super::routes::chat))
        .route("/api/v1/schema", get(super::routes::schema))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Start the HTTP server.
pub async fn start(config: &GatewayConfig, router: Arc<drivewise_agent::Router>) -> anyhow::Result<()> {
    let app = build_router(AppState::new(config.clone(), router));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
