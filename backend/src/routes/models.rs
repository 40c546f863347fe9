//! Model call and listing endpoints.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use pressurize_common::CallEnvelope;

use crate::error::GatewayError;
use crate::AppState;

/// A method entry in the model listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodObject {
    pub name: String,
    pub batch: bool,
}

/// Model entry in the listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelObject {
    pub name: String,
    pub methods: Vec<MethodObject>,
    pub cache_lifetime: i64,
    pub min_batch_time_ms: u64,
    pub max_batch_time_ms: u64,
    pub max_batch_size: usize,
}

/// Response from GET /api/models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelObject>,
}

/// POST /api/models/{model}/{method}/ - Call a model method
async fn call_model(
    State(state): State<Arc<AppState>>,
    Path((model, method)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<CallEnvelope>, GatewayError> {
    let envelope = state.dispatcher.dispatch(&model, &method, &body).await?;
    Ok(Json(envelope))
}

/// GET /api/models - List registered models
async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    let models = state
        .registry
        .models()
        .into_iter()
        .map(|m| ModelObject {
            name: m.name.clone(),
            methods: m
                .methods()
                .map(|(name, batch)| MethodObject {
                    name: name.to_string(),
                    batch,
                })
                .collect(),
            cache_lifetime: m.cache_lifetime,
            min_batch_time_ms: m.batch.min_batch_time.as_millis() as u64,
            max_batch_time_ms: m.batch.max_batch_time.as_millis() as u64,
            max_batch_size: m.batch.max_batch_size,
        })
        .collect();

    Json(ModelsResponse { models })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/models", get(list_models))
        .route("/api/models/", get(list_models))
        .route("/api/models/:model/:method/", post(call_model))
        .route("/api/models/:model/:method", post(call_model))
        .with_state(state)
}
