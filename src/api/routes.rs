//! Route definitions.

use super::handlers::*;
use super::websocket::websocket_handler;
use crate::config::ServerConfig;
use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the API router with all endpoints.
pub fn create_router(state: Arc<AppState>, config: &ServerConfig) -> Router {
    let cors = if config.allowed_origins.iter().any(|origin| origin == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any)
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/state", get(state_handler))
        .route("/history", get(history_handler))
        .route("/verify", get(verify_handler))
        .route("/bet", post(place_bet_handler))
        .route("/cashout", post(cashout_handler))
        .route("/settlements/unresolved", get(unresolved_settlements_handler))
        .route("/ws", get(websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors)
        .with_state(state)
}
