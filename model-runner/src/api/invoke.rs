//! Single and batch method calls.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

use pressurize_common::{BatchReply, BatchRequest, InstanceReply, BATCH_METHOD_PREFIX};

use crate::error::{Error, Result};
use crate::state::AppState;

/// Build the invoke router.
///
/// Batch calls share the path shape of single calls, distinguished by the
/// `batch_` method prefix. A method declared with that prefix is called
/// directly.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/:model/:method/", post(invoke))
}

/// POST /api/{model}/{method}/ or /api/{model}/batch_{method}/
async fn invoke(
    State(state): State<Arc<AppState>>,
    Path((model, method)): Path<(String, String)>,
    body: Bytes,
) -> Result<Response> {
    if state.resolve(&model, &method).is_err() {
        if let Some(inner) = method.strip_prefix(BATCH_METHOD_PREFIX) {
            return invoke_batch(&state, &model, inner, &body).await;
        }
    }
    invoke_single(&state, &model, &method, &body).await
}

async fn invoke_single(state: &AppState, model: &str, method: &str, body: &[u8]) -> Result<Response> {
    tracing::info!("Method call for {} {}", model, method);
    let (served, op) = state.resolve(model, method)?;
    let payload: Value = serde_json::from_slice(body).map_err(|_| Error::MissingData)?;

    tokio::time::sleep(served.delay).await;
    let result = op.apply(&payload)?;
    Ok(Json(InstanceReply::success(result)).into_response())
}

async fn invoke_batch(state: &AppState, model: &str, method: &str, body: &[u8]) -> Result<Response> {
    let (served, op) = state.resolve(model, method)?;
    let request: BatchRequest =
        serde_json::from_slice(body).map_err(|e| Error::InvalidRequest(e.to_string()))?;
    tracing::info!(
        "Batch method call for {} {} ({} requests)",
        model,
        method,
        request.requests.len()
    );

    tokio::time::sleep(served.delay).await;
    let responses = request
        .requests
        .iter()
        .map(|payload| match op.apply(payload) {
            Ok(result) => InstanceReply::success(result),
            Err(e) => InstanceReply::failure(e.to_string()),
        })
        .collect();

    Ok(Json(BatchReply { responses }).into_response())
}
