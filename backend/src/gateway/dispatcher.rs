//! Orchestration of one inbound model call.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use pressurize_common::CallEnvelope;

use super::batch_queue::{BatchKey, BatchQueue};
use super::registry::{ModelRegistry, RegisteredModel};
use super::router::{reply_outcome, ModelBackend};
use super::stats::GatewayStats;
use crate::auth::TokenValidator;
use crate::cache::{cache_key, ResponseCache};
use crate::error::{DownstreamError, GatewayError};
use crate::models::ModelCall;

/// `cache_time` reported when no cache entry was consulted.
pub const NO_CACHE_TIME: i64 = -1;

/// Runs validate, parse, authenticate, cache lookup, dispatch and cache
/// store for each call.
pub struct RequestDispatcher {
    registry: Arc<ModelRegistry>,
    /// `None` when the deployment disables auth.
    validator: Option<TokenValidator>,
    cache: ResponseCache,
    backend: Arc<dyn ModelBackend>,
    batch_queue: Arc<BatchQueue>,
    stats: Arc<GatewayStats>,
}

impl RequestDispatcher {
    pub fn new(
        registry: Arc<ModelRegistry>,
        validator: Option<TokenValidator>,
        cache: ResponseCache,
        backend: Arc<dyn ModelBackend>,
        response_allowance: Duration,
        stats: Arc<GatewayStats>,
    ) -> Self {
        let batch_queue = Arc::new(BatchQueue::new(
            backend.clone(),
            response_allowance,
            stats.clone(),
        ));
        Self {
            registry,
            validator,
            cache,
            backend,
            batch_queue,
            stats,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn batch_queue(&self) -> &Arc<BatchQueue> {
        &self.batch_queue
    }

    /// Handle `POST /api/models/{model}/{method}/` with the raw body.
    pub async fn dispatch(
        &self,
        model: &str,
        method: &str,
        body: &[u8],
    ) -> Result<CallEnvelope, GatewayError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("call", %request_id, model, method);
        self.stats.record_request();
        self.run(model, method, body).instrument(span).await
    }

    async fn run(
        &self,
        model: &str,
        method: &str,
        body: &[u8],
    ) -> Result<CallEnvelope, GatewayError> {
        let entry = self.registry.resolve(model, method)?;
        let call = ModelCall::parse(body)?;

        if let Some(validator) = &self.validator {
            validator.authenticate(&call)?;
        }

        let no_cache = call.no_cache();
        let key = if no_cache {
            None
        } else {
            Some(cache_key(model, method, &call.stable_payload()))
        };

        if let Some(key) = &key {
            if let Some((result, creation_time)) = self.cache.lookup(key) {
                tracing::debug!("Cache hit");
                self.stats.record_cache_hit();
                return Ok(CallEnvelope {
                    model: model.to_string(),
                    method: method.to_string(),
                    from_cache: true,
                    batched: false,
                    cache_time: creation_time,
                    result,
                });
            }
            self.stats.record_cache_miss();
        }

        let batched = entry.method_batches(method);
        let result = self.call_model(entry, method, batched, call.forward_payload()).await?;

        if let Some(key) = &key {
            self.cache.store(key, &result, entry.cache_lifetime);
        }

        tracing::info!(batched, no_cache, "Call completed");
        Ok(CallEnvelope {
            model: model.to_string(),
            method: method.to_string(),
            from_cache: false,
            batched,
            cache_time: NO_CACHE_TIME,
            result,
        })
    }

    async fn call_model(
        &self,
        entry: &RegisteredModel,
        method: &str,
        batched: bool,
        payload: Value,
    ) -> Result<Value, DownstreamError> {
        if batched {
            let key = BatchKey::new(entry.name.as_str(), method);
            return self.batch_queue.join(key, entry.batch, payload).await;
        }

        self.stats.record_direct_call();
        let outcome = self
            .backend
            .call(&entry.name, method, &payload)
            .await
            .and_then(reply_outcome);
        if let Err(e) = &outcome {
            tracing::warn!("Direct call failed: {}", e);
            self.stats.record_downstream_error();
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthError;
    use crate::store::SqliteStore;
    use crate::test_util::{test_config, Behavior, RecordingBackend, TEST_SECRET, TEST_TOKEN};
    use serde_json::json;

    fn dispatcher_with(backend: Arc<RecordingBackend>, auth: bool) -> RequestDispatcher {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let validator = TokenValidator::new(store.clone());
        validator.create_token(TEST_TOKEN, TEST_SECRET, 3600).unwrap();

        RequestDispatcher::new(
            Arc::new(ModelRegistry::from_config(&test_config())),
            auth.then_some(validator),
            ResponseCache::new(store),
            backend,
            Duration::from_secs(5),
            Arc::new(GatewayStats::default()),
        )
    }

    fn body(value: Value) -> Vec<u8> {
        value.to_string().into_bytes()
    }

    fn authed(number: i64) -> Vec<u8> {
        body(json!({
            "data": {"number": number},
            "auth_token_key": TEST_TOKEN,
            "auth_secret": TEST_SECRET,
        }))
    }

    #[tokio::test]
    async fn test_validation_runs_first() {
        let backend = Arc::new(RecordingBackend::new(Behavior::Increment));
        let d = dispatcher_with(backend.clone(), true);

        let err = d.dispatch("Nope", "classify", b"not json").await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
        let err = d.dispatch("TestModel", "train", b"{}").await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
        assert!(backend.single_calls().is_empty());
    }

    #[tokio::test]
    async fn test_parse_then_auth() {
        let backend = Arc::new(RecordingBackend::new(Behavior::Increment));
        let d = dispatcher_with(backend.clone(), true);

        let err = d.dispatch("TestModel", "classify", b"{bad").await.unwrap_err();
        assert!(matches!(err, GatewayError::Parse(_)));

        let err = d
            .dispatch("TestModel", "classify", &body(json!({"data": {"number": 1}})))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Auth(AuthError::MissingToken)));

        let err = d
            .dispatch(
                "TestModel",
                "classify",
                &body(json!({"auth_token_key": TEST_TOKEN, "auth_secret": "wrong"})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Auth(AuthError::InvalidCredentials)));
        assert!(backend.single_calls().is_empty());
    }

    #[tokio::test]
    async fn test_auth_disabled_skips_credentials() {
        let backend = Arc::new(RecordingBackend::new(Behavior::Increment));
        let d = dispatcher_with(backend, false);

        let envelope = d
            .dispatch("TestModel", "classify", &body(json!({"data": {"number": 1}})))
            .await
            .unwrap();
        assert_eq!(envelope.result, json!({"number": 2}));
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let backend = Arc::new(RecordingBackend::new(Behavior::Increment));
        let d = dispatcher_with(backend.clone(), true);

        let first = d.dispatch("TestModel", "classify", &authed(42)).await.unwrap();
        assert!(!first.from_cache);
        assert!(!first.batched);
        assert_eq!(first.cache_time, NO_CACHE_TIME);
        assert_eq!(first.result, json!({"number": 43}));

        let second = d.dispatch("TestModel", "classify", &authed(42)).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.result, json!({"number": 43}));
        assert!(second.cache_time > 0);
        assert_eq!(backend.single_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_no_cache_bypasses_get_and_put() {
        let backend = Arc::new(RecordingBackend::new(Behavior::Increment));
        let d = dispatcher_with(backend.clone(), true);

        let uncached = json!({
            "data": {"number": 5},
            "auth_token_key": TEST_TOKEN,
            "auth_secret": TEST_SECRET,
            "no_cache": true,
        });
        for _ in 0..2 {
            let envelope = d.dispatch("TestModel", "classify", &body(uncached.clone())).await.unwrap();
            assert!(!envelope.from_cache);
        }

        // nothing was stored either
        let envelope = d.dispatch("TestModel", "classify", &authed(5)).await.unwrap();
        assert!(!envelope.from_cache);
        assert_eq!(backend.single_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_credentials_not_forwarded() {
        let backend = Arc::new(RecordingBackend::new(Behavior::Increment));
        let d = dispatcher_with(backend.clone(), true);

        let mut value = json!({
            "data": {"number": 1},
            "user_id": "u1",
            "auth_token_key": TEST_TOKEN,
            "auth_secret": TEST_SECRET,
        });
        d.dispatch("TestModel", "classify", &body(value.clone())).await.unwrap();

        let sent = &backend.single_calls()[0];
        assert_eq!(sent, &json!({"data": {"number": 1}, "user_id": "u1"}));

        // a different user gets the cached answer
        value["user_id"] = json!("u2");
        let envelope = d.dispatch("TestModel", "classify", &body(value)).await.unwrap();
        assert!(envelope.from_cache);
    }

    #[tokio::test]
    async fn test_batching_method_goes_through_queue() {
        let backend = Arc::new(RecordingBackend::new(Behavior::Increment));
        let d = dispatcher_with(backend.clone(), true);

        let envelope = d.dispatch("TestModel", "predict", &authed(10)).await.unwrap();
        assert!(envelope.batched);
        assert_eq!(envelope.result, json!({"number": 11}));
        assert_eq!(backend.batch_calls().len(), 1);
        assert!(backend.single_calls().is_empty());
    }

    #[tokio::test]
    async fn test_model_error_fails_call_and_is_not_cached() {
        let backend = Arc::new(RecordingBackend::new(Behavior::RejectOdd));
        let d = dispatcher_with(backend.clone(), true);

        for _ in 0..2 {
            let err = d.dispatch("TestModel", "classify", &authed(3)).await.unwrap_err();
            assert!(matches!(err, GatewayError::Downstream(DownstreamError::Model(_))));
        }
        assert_eq!(backend.single_calls().len(), 2);
    }
}
