//! Shared fixtures for unit and integration tests.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use pressurize_common::InstanceReply;

use crate::config::{
    AuthConfig, BatchingConfig, Config, DatabaseConfig, DeploymentConfig, DownstreamConfig,
    LoggingConfig, MethodConfig, ModelConfig, ServerConfig,
};
use crate::error::DownstreamError;
use crate::gateway::{ModelBackend, ModelRegistry};
use crate::store::{AuthToken, SqliteStore, TokenStore};
use crate::AppState;

pub const TEST_TOKEN: &str = "K";
pub const TEST_SECRET: &str = "S";

/// One model, `TestModel`, with a batching `predict` and a direct `classify`.
pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 5000,
        },
        deployment: DeploymentConfig::default(),
        auth: AuthConfig { enabled: true },
        database: DatabaseConfig {
            url: ":memory:".to_string(),
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
        batching: BatchingConfig {
            response_allowance_ms: 5_000,
        },
        downstream: DownstreamConfig { timeout_secs: 5 },
        models: vec![ModelConfig {
            name: "TestModel".to_string(),
            path: Some("test_model.TestModel".to_string()),
            methods: vec![
                MethodConfig::Detailed {
                    name: "predict".to_string(),
                    batch: true,
                },
                MethodConfig::Name("classify".to_string()),
            ],
            cache_lifetime: Some(60),
            min_batch_time: Some(50),
            max_batch_time: Some(300),
            max_batch_size: Some(10),
            host: Some("http://127.0.0.1:9".to_string()),
        }],
    }
}

/// How a [`RecordingBackend`] answers.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// `{"number": data.number + 1}`, or an item error without a number.
    Increment,
    /// Like `Increment`, but odd numbers get an item error.
    RejectOdd,
    /// Like `Increment`, but batch replies lose their last entry.
    DropLast,
    /// Every call fails as unreachable with this message.
    Fail(String),
    /// Never answers.
    Hang,
}

/// A fake model instance that records what it was sent.
pub struct RecordingBackend {
    behavior: Behavior,
    single: Mutex<Vec<Value>>,
    batches: Mutex<Vec<Vec<Value>>>,
}

impl RecordingBackend {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            single: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Payloads of single calls, in arrival order.
    pub fn single_calls(&self) -> Vec<Value> {
        lock(&self.single).clone()
    }

    /// Payload lists of batch calls, in arrival order.
    pub fn batch_calls(&self) -> Vec<Vec<Value>> {
        lock(&self.batches).clone()
    }

    fn answer(&self, payload: &Value) -> InstanceReply {
        let number = match payload["data"]["number"].as_i64() {
            Some(n) => n,
            None => return InstanceReply::failure("Data not provided"),
        };
        if matches!(self.behavior, Behavior::RejectOdd) && number % 2 != 0 {
            return InstanceReply::failure(format!("odd number {}", number));
        }
        InstanceReply::success(json!({"number": number + 1}))
    }

    async fn misbehave(&self) -> Result<(), DownstreamError> {
        match &self.behavior {
            Behavior::Fail(message) => Err(DownstreamError::Unreachable(message.clone())),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(DownstreamError::Timeout(Duration::from_secs(3600)))
            }
            _ => Ok(()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ModelBackend for RecordingBackend {
    async fn call(
        &self,
        _model: &str,
        _method: &str,
        payload: &Value,
    ) -> Result<InstanceReply, DownstreamError> {
        lock(&self.single).push(payload.clone());
        self.misbehave().await?;
        Ok(self.answer(payload))
    }

    async fn call_batch(
        &self,
        _model: &str,
        _method: &str,
        payloads: &[Value],
    ) -> Result<Vec<InstanceReply>, DownstreamError> {
        lock(&self.batches).push(payloads.to_vec());
        self.misbehave().await?;

        let mut replies: Vec<InstanceReply> = payloads.iter().map(|p| self.answer(p)).collect();
        if matches!(self.behavior, Behavior::DropLast) {
            replies.pop();
        }
        Ok(replies)
    }
}

/// App state over an in-memory store holding the token `K`/`S`.
pub fn test_state(config: Config, backend: Arc<dyn ModelBackend>) -> Arc<AppState> {
    let store = Arc::new(in_memory_store());
    let registry = Arc::new(ModelRegistry::from_config(&config));
    Arc::new(AppState::with_parts(
        config,
        registry,
        store.clone(),
        store,
        backend,
    ))
}

/// In-memory store seeded with a live `K`/`S` token.
pub fn in_memory_store() -> SqliteStore {
    let store = match SqliteStore::in_memory() {
        Ok(store) => store,
        Err(e) => panic!("in-memory store: {}", e),
    };
    let token = AuthToken {
        key: TEST_TOKEN.to_string(),
        secret: TEST_SECRET.to_string(),
        expires: Utc::now().timestamp() + 3600,
    };
    if let Err(e) = store.put_token(&token) {
        panic!("seeding test token: {}", e);
    }
    store
}
