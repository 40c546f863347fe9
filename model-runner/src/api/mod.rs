//! Model instance HTTP API.

pub mod health;
pub mod invoke;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Build the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(invoke::router())
        .route("/health", get(health::health))
}

/// The complete application with state and layers applied.
pub fn app(state: Arc<AppState>) -> Router {
    router().layer(CorsLayer::permissive()).with_state(state)
}
