//! Model registry: which models and methods exist, how they batch and cache,
//! and where their instances live.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use pressurize_common::BATCH_METHOD_PREFIX;

use crate::config::{
    Config, DeploymentConfig, ModelConfig, DEFAULT_CACHE_LIFETIME_SECS, DEFAULT_MAX_BATCH_SIZE,
    DEFAULT_MAX_BATCH_TIME_MS, DEFAULT_MIN_BATCH_TIME_MS,
};
use crate::error::GatewayError;

/// Batch window tunables for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    /// Minimum spacing between windows, enforced while an accumulator is empty.
    pub min_batch_time: Duration,
    /// Maximum age of the oldest request in a window.
    pub max_batch_time: Duration,
    /// Hard cap on requests per downstream batch.
    pub max_batch_size: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            min_batch_time: Duration::from_millis(DEFAULT_MIN_BATCH_TIME_MS),
            max_batch_time: Duration::from_millis(DEFAULT_MAX_BATCH_TIME_MS),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

/// A model as served by the gateway. Immutable after load.
#[derive(Debug, Clone)]
pub struct RegisteredModel {
    pub name: String,
    pub path: Option<String>,
    /// Method name -> batches.
    methods: BTreeMap<String, bool>,
    /// Seconds.
    pub cache_lifetime: i64,
    pub batch: BatchSettings,
    /// Base URL of the model instance, without trailing slash.
    pub host: String,
}

impl RegisteredModel {
    fn from_config(config: &ModelConfig, deployment: &DeploymentConfig) -> Self {
        let defaults = BatchSettings::default();
        let host = config
            .host
            .clone()
            .or_else(|| deployment.model_host.clone())
            .unwrap_or_else(|| deployment_host(deployment, &config.name));

        Self {
            name: config.name.clone(),
            path: config.path.clone(),
            methods: config
                .methods
                .iter()
                .map(|m| (m.name().to_string(), m.batch()))
                .collect(),
            cache_lifetime: config.cache_lifetime.unwrap_or(DEFAULT_CACHE_LIFETIME_SECS),
            batch: BatchSettings {
                min_batch_time: config
                    .min_batch_time
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.min_batch_time),
                max_batch_time: config
                    .max_batch_time
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.max_batch_time),
                max_batch_size: config.max_batch_size.unwrap_or(defaults.max_batch_size),
            },
            host: host.trim_end_matches('/').to_string(),
        }
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// Whether calls to `method` go through the batch coalescer.
    pub fn method_batches(&self, method: &str) -> bool {
        self.methods.get(method).copied().unwrap_or(false)
    }

    /// Methods in name order with their batching flag.
    pub fn methods(&self) -> impl Iterator<Item = (&str, bool)> {
        self.methods.iter().map(|(name, batch)| (name.as_str(), *batch))
    }

    /// `{host}/api/{model}/{method}/`
    pub fn method_url(&self, method: &str) -> String {
        format!("{}/api/{}/{}/", self.host, self.name, method)
    }

    /// `{host}/api/{model}/batch_{method}/`
    pub fn batch_method_url(&self, method: &str) -> String {
        format!("{}/api/{}/{}{}/", self.host, self.name, BATCH_METHOD_PREFIX, method)
    }
}

/// Registry of models loaded from configuration.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<String, RegisteredModel>,
}

impl ModelRegistry {
    /// Build the registry from a validated configuration.
    pub fn from_config(config: &Config) -> Self {
        let models = config
            .models
            .iter()
            .map(|m| {
                let model = RegisteredModel::from_config(m, &config.deployment);
                tracing::debug!("Registered model {} at {}", model.name, model.host);
                (model.name.clone(), model)
            })
            .collect();
        Self { models }
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredModel> {
        self.models.get(name)
    }

    /// Look up a model, failing unless it exposes `method`.
    pub fn resolve(&self, model: &str, method: &str) -> Result<&RegisteredModel, GatewayError> {
        let entry = self
            .models
            .get(model)
            .ok_or_else(|| GatewayError::Validation(format!("No known model '{}'", model)))?;

        if !entry.has_method(method) {
            return Err(GatewayError::Validation(format!(
                "No method '{}' found for model '{}'.",
                method, model
            )));
        }
        Ok(entry)
    }

    /// All models in name order.
    pub fn models(&self) -> Vec<&RegisteredModel> {
        let mut models: Vec<_> = self.models.values().collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Host derived from the deployment naming convention.
pub fn deployment_host(deployment: &DeploymentConfig, model: &str) -> String {
    format!(
        "http://{}-{}.{}.elasticbeanstalk.com",
        sanitize(&deployment.name),
        model,
        deployment.region
    )
}

fn sanitize(name: &str) -> String {
    name.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}
