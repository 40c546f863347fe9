pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod models;
pub mod routes;
pub mod store;
pub mod test_util;

pub use config::{Config, ConfigError, ModelConfig};
pub use error::{DownstreamError, GatewayError, StartupError};
pub use gateway::{
    BatchQueue, GatewayStats, InstanceRouter, ModelBackend, ModelRegistry, RequestDispatcher,
};

use std::sync::Arc;
use std::time::Duration;

use auth::TokenValidator;
use cache::ResponseCache;
use store::{CacheStore, SqliteStore, TokenStore};

/// Shared application state, built once at startup and handed to every route.
pub struct AppState {
    pub config: Config,
    pub registry: Arc<ModelRegistry>,
    pub dispatcher: RequestDispatcher,
    pub stats: Arc<GatewayStats>,
}

impl AppState {
    /// Build the gateway from configuration: SQLite stores named after the
    /// deployment and an HTTP client for the model instances.
    pub fn from_config(config: Config) -> Result<Self, StartupError> {
        let store = Arc::new(SqliteStore::new(
            &config.database.url,
            &config.deployment.table_name("auth"),
            &config.deployment.table_name("cache"),
        )?);
        let registry = Arc::new(ModelRegistry::from_config(&config));
        let backend = Arc::new(InstanceRouter::new(
            registry.clone(),
            Duration::from_secs(config.downstream.timeout_secs),
        )?);

        Ok(Self::with_parts(config, registry, store.clone(), store, backend))
    }

    /// Assemble the state from explicit collaborators.
    pub fn with_parts(
        config: Config,
        registry: Arc<ModelRegistry>,
        tokens: Arc<dyn TokenStore>,
        cache: Arc<dyn CacheStore>,
        backend: Arc<dyn ModelBackend>,
    ) -> Self {
        let stats = Arc::new(GatewayStats::default());
        let validator = if config.auth.enabled {
            Some(TokenValidator::new(tokens))
        } else {
            tracing::warn!("Authentication is disabled; calls are not checked");
            None
        };

        let dispatcher = RequestDispatcher::new(
            registry.clone(),
            validator,
            ResponseCache::new(cache),
            backend,
            Duration::from_millis(config.batching.response_allowance_ms),
            stats.clone(),
        );

        Self {
            config,
            registry,
            dispatcher,
            stats,
        }
    }
}
