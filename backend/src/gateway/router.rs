//! Downstream calls to model instances.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use pressurize_common::{BatchReply, BatchRequest, InstanceReply};

use super::registry::{ModelRegistry, RegisteredModel};
use crate::error::DownstreamError;

/// A model-serving backend accepting single and batch calls.
///
/// `call_batch` must return replies in request order.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn call(
        &self,
        model: &str,
        method: &str,
        payload: &Value,
    ) -> Result<InstanceReply, DownstreamError>;

    async fn call_batch(
        &self,
        model: &str,
        method: &str,
        payloads: &[Value],
    ) -> Result<Vec<InstanceReply>, DownstreamError>;
}

/// Turn an instance reply into the call result.
pub fn reply_outcome(reply: InstanceReply) -> Result<Value, DownstreamError> {
    if let Some(message) = reply.error_message() {
        return Err(DownstreamError::Model(message));
    }
    reply
        .result
        .ok_or_else(|| DownstreamError::InvalidResponse("Missing result from model server".to_string()))
}

/// HTTP client for model instances, resolving hosts through the registry.
pub struct InstanceRouter {
    registry: Arc<ModelRegistry>,
    http_client: Client,
}

impl InstanceRouter {
    pub fn new(registry: Arc<ModelRegistry>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            registry,
            http_client: Client::builder().timeout(timeout).build()?,
        })
    }

    fn model(&self, model: &str) -> Result<&RegisteredModel, DownstreamError> {
        self.registry
            .get(model)
            .ok_or_else(|| DownstreamError::Unreachable(format!("no host for model '{}'", model)))
    }

    /// POST `body` to `url` and decode the JSON reply.
    async fn post<Req, Resp>(&self, url: &str, body: &Req) -> Result<Resp, DownstreamError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        tracing::debug!("POST {}", url);

        let response = self
            .http_client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| DownstreamError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Model instance error body: {}", body);
            // Instances report failures as {"error": ...} with a 4xx/5xx status
            if let Ok(reply) = serde_json::from_str::<InstanceReply>(&body) {
                if let Some(message) = reply.error_message() {
                    return Err(DownstreamError::Model(message));
                }
            }
            return Err(DownstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| DownstreamError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ModelBackend for InstanceRouter {
    async fn call(
        &self,
        model: &str,
        method: &str,
        payload: &Value,
    ) -> Result<InstanceReply, DownstreamError> {
        let url = self.model(model)?.method_url(method);
        self.post(&url, payload).await
    }

    async fn call_batch(
        &self,
        model: &str,
        method: &str,
        payloads: &[Value],
    ) -> Result<Vec<InstanceReply>, DownstreamError> {
        let url = self.model(model)?.batch_method_url(method);
        let request = BatchRequest {
            requests: payloads.to_vec(),
        };
        let reply: BatchReply = self.post(&url, &request).await?;
        Ok(reply.responses)
    }
}
