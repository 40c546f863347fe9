//! Shared application state.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ops::Operation;

/// A model as served by this runner.
#[derive(Debug, Clone)]
pub struct ServedModel {
    pub name: String,
    pub methods: BTreeMap<String, Operation>,
    pub delay: Duration,
}

/// Shared application state passed to all handlers.
pub struct AppState {
    pub config: Config,
    models: HashMap<String, ServedModel>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let models = config
            .models
            .iter()
            .map(|m| {
                let served = ServedModel {
                    name: m.name.clone(),
                    methods: m.methods.clone(),
                    delay: Duration::from_millis(m.delay_ms),
                };
                (m.name.clone(), served)
            })
            .collect();
        Self { config, models }
    }

    /// Find the model and the operation behind `method`.
    pub fn resolve(&self, model: &str, method: &str) -> Result<(&ServedModel, Operation)> {
        let served = self
            .models
            .get(model)
            .ok_or_else(|| Error::ModelNotFound(model.to_string()))?;
        let op = served
            .methods
            .get(method)
            .copied()
            .ok_or_else(|| Error::MethodNotFound(method.to_string()))?;
        Ok((served, op))
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }
}
