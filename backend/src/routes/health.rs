use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    models: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        models: state.registry.len(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let s = state.stats.snapshot();
    let body = format!(
        "# HELP pressurize_up Whether the service is up\n\
         # TYPE pressurize_up gauge\n\
         pressurize_up 1\n\
         # HELP pressurize_info Service information\n\
         # TYPE pressurize_info gauge\n\
         pressurize_info{{version=\"{}\"}} 1\n\
         # HELP pressurize_requests_total Model calls received\n\
         # TYPE pressurize_requests_total counter\n\
         pressurize_requests_total {}\n\
         # HELP pressurize_cache_hits_total Calls answered from the cache\n\
         # TYPE pressurize_cache_hits_total counter\n\
         pressurize_cache_hits_total {}\n\
         # HELP pressurize_cache_misses_total Cache lookups that missed\n\
         # TYPE pressurize_cache_misses_total counter\n\
         pressurize_cache_misses_total {}\n\
         # HELP pressurize_batches_total Downstream batch calls\n\
         # TYPE pressurize_batches_total counter\n\
         pressurize_batches_total {}\n\
         # HELP pressurize_batched_requests_total Calls sent inside a batch\n\
         # TYPE pressurize_batched_requests_total counter\n\
         pressurize_batched_requests_total {}\n\
         # HELP pressurize_direct_calls_total Downstream single calls\n\
         # TYPE pressurize_direct_calls_total counter\n\
         pressurize_direct_calls_total {}\n\
         # HELP pressurize_downstream_errors_total Failed downstream calls\n\
         # TYPE pressurize_downstream_errors_total counter\n\
         pressurize_downstream_errors_total {}\n",
        env!("CARGO_PKG_VERSION"),
        s.requests,
        s.cache_hits,
        s.cache_misses,
        s.batches_dispatched,
        s.batched_requests,
        s.direct_calls,
        s.downstream_errors,
    );
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}
