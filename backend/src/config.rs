//! Configuration for the API gateway.

use std::collections::HashSet;
use std::path::Path;

use config::{Config as ConfigLoader, Environment, File};
use serde::Deserialize;

/// Cache lifetime applied when a model does not declare one (one day).
pub const DEFAULT_CACHE_LIFETIME_SECS: i64 = 60 * 60 * 24;
/// Longest accepted cache lifetime (100 years).
pub const MAX_CACHE_LIFETIME_SECS: i64 = 100 * 365 * DEFAULT_CACHE_LIFETIME_SECS;
pub const DEFAULT_MIN_BATCH_TIME_MS: u64 = 100;
pub const DEFAULT_MAX_BATCH_TIME_MS: u64 = 1000;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub downstream: DownstreamConfig,
    /// The model registry.
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Deployment naming, used to derive store tables and model instance hosts.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default = "default_deployment_name")]
    pub name: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Host serving every model, overriding the deployment convention.
    #[serde(default)]
    pub model_host: Option<String>,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            name: default_deployment_name(),
            region: default_region(),
            model_host: None,
        }
    }
}

impl DeploymentConfig {
    /// Store table name for this deployment, e.g. `pressurize_test_cache`.
    pub fn table_name(&self, suffix: &str) -> String {
        let base: String = self
            .name
            .replace('-', "_")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        format!("{}_{}", base, suffix)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// When false, calls are dispatched without checking credentials.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchingConfig {
    /// Allowance for the downstream batch call, added to a model's
    /// `max_batch_time` to bound how long a joined caller waits.
    #[serde(default = "default_response_allowance")]
    pub response_allowance_ms: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            response_allowance_ms: default_response_allowance(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownstreamConfig {
    #[serde(default = "default_downstream_timeout")]
    pub timeout_secs: u64,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_downstream_timeout(),
        }
    }
}

/// A registered model.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    /// Import path of the model implementation on the instance side.
    #[serde(default)]
    pub path: Option<String>,
    pub methods: Vec<MethodConfig>,
    /// Cache lifetime in seconds.
    #[serde(default)]
    pub cache_lifetime: Option<i64>,
    /// Milliseconds.
    #[serde(default)]
    pub min_batch_time: Option<u64>,
    /// Milliseconds.
    #[serde(default)]
    pub max_batch_time: Option<u64>,
    #[serde(default)]
    pub max_batch_size: Option<usize>,
    /// Host serving this model, overriding the deployment host.
    #[serde(default)]
    pub host: Option<String>,
}

/// A method entry: either `"predict"` or `{ name = "predict", batch = true }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MethodConfig {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        batch: bool,
    },
}

impl MethodConfig {
    pub fn name(&self) -> &str {
        match self {
            MethodConfig::Name(name) => name,
            MethodConfig::Detailed { name, .. } => name,
        }
    }

    /// Whether calls to this method go through the batch coalescer.
    pub fn batch(&self) -> bool {
        match self {
            MethodConfig::Name(_) => false,
            MethodConfig::Detailed { batch, .. } => *batch,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid model registry: {0}")]
    InvalidRegistry(String),
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_deployment_name() -> String {
    "pressurize".to_string()
}
fn default_region() -> String {
    "us-west-2".to_string()
}
fn default_true() -> bool {
    true
}
fn default_database_url() -> String {
    "sqlite:./data/pressurize.db".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_response_allowance() -> u64 {
    30_000
}
fn default_downstream_timeout() -> u64 {
    300
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (PRESSURIZE__SECTION__KEY format)
    /// 2. `path` if given, else pressurize.{toml,json} (if present)
    /// 3. Built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("pressurize").required(false),
        };

        let loaded = ConfigLoader::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .add_source(file)
            .add_source(
                Environment::with_prefix("PRESSURIZE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = loaded.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the model registry for structural problems.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.models.is_empty() {
            return Err(ConfigError::InvalidRegistry("no models configured".to_string()));
        }

        let mut names = HashSet::new();
        for model in &self.models {
            if model.name.is_empty() {
                return Err(ConfigError::InvalidRegistry("model with empty name".to_string()));
            }
            if !names.insert(model.name.as_str()) {
                return Err(ConfigError::InvalidRegistry(format!(
                    "duplicate model '{}'",
                    model.name
                )));
            }
            if model.methods.is_empty() {
                return Err(ConfigError::InvalidRegistry(format!(
                    "model '{}' declares no methods",
                    model.name
                )));
            }

            let mut methods = HashSet::new();
            for method in &model.methods {
                if method.name().is_empty() || !methods.insert(method.name()) {
                    return Err(ConfigError::InvalidRegistry(format!(
                        "model '{}' has an empty or duplicate method '{}'",
                        model.name,
                        method.name()
                    )));
                }
            }

            if let Some(ttl) = model.cache_lifetime {
                if !(0..=MAX_CACHE_LIFETIME_SECS).contains(&ttl) {
                    return Err(ConfigError::InvalidRegistry(format!(
                        "model '{}' has cache_lifetime {}s outside 0..={}",
                        model.name, ttl, MAX_CACHE_LIFETIME_SECS
                    )));
                }
            }
            if model.max_batch_size == Some(0) {
                return Err(ConfigError::InvalidRegistry(format!(
                    "model '{}' has max_batch_size 0",
                    model.name
                )));
            }
            let min = model.min_batch_time.unwrap_or(DEFAULT_MIN_BATCH_TIME_MS);
            let max = model.max_batch_time.unwrap_or(DEFAULT_MAX_BATCH_TIME_MS);
            if min > max {
                return Err(ConfigError::InvalidRegistry(format!(
                    "model '{}' has min_batch_time {}ms above max_batch_time {}ms",
                    model.name, min, max
                )));
            }
        }

        Ok(())
    }
}
