//! Configuration for the model runner.

use std::collections::BTreeMap;
use std::path::Path;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

use crate::ops::Operation;

/// Main configuration structure for the model runner.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default = "default_models")]
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// A model served by this runner.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    /// Method name -> operation it performs.
    pub methods: BTreeMap<String, Operation>,
    /// Simulated inference latency per call, applied once per batch.
    #[serde(default)]
    pub delay_ms: u64,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

/// `TestModel` with `predict` and `classify` both incrementing, as the
/// gateway's example registry expects.
fn default_models() -> Vec<ModelConfig> {
    vec![ModelConfig {
        name: "TestModel".to_string(),
        methods: BTreeMap::from([
            ("predict".to_string(), Operation::Increment),
            ("classify".to_string(), Operation::Increment),
        ]),
        delay_ms: 0,
    }]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            models: default_models(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (RUNNER__SECTION__KEY format)
    /// 2. `path` if given, else runner.toml (if present)
    /// 3. Built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("runner").required(false),
        };

        let config = ConfigLoader::builder()
            .set_default("api.host", default_host())?
            .set_default("api.port", default_port() as i64)?
            .add_source(file)
            .add_source(
                Environment::with_prefix("RUNNER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
