//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, Method},
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::app::AppState;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    // CLIENT_ORIGIN may list several origins, comma-separated
    let cors = match &state.config.client_origin {
        Some(origins) => {
            let allowed_origins: Vec<header::HeaderValue> = origins
                .split(',')
                .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
                .collect();
            cors.allow_origin(allowed_origins)
        }
        None => cors.allow_origin(Any),
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    connected_clients: usize,
    entities: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connected_clients = state.server.registry().len().await;
    let entities = state.world.read().entity_count();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        connected_clients,
        entities,
    })
}
