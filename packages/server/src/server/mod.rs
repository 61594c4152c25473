//! HTTP server setup.

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::JwtService;
use crate::gateway::{self, GatewayState};
use crate::gateway::rooms::RoomRegistry;

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Build the Axum application router: the websocket gateway plus a health
/// check. Quiz submission itself arrives through `ProcessingService`, which
/// the external routing layer owns.
pub fn build_app(rooms: RoomRegistry, jwt: Arc<JwtService>) -> Router {
    let gateway_state = GatewayState { rooms, jwt };

    Router::new()
        .route("/health", get(health_handler))
        .merge(gateway::router(gateway_state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
