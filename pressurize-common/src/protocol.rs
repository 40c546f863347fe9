//! HTTP protocol types for gateway <-> model instance communication.
//!
//! # Model instance endpoints
//!
//! - `POST {host}/api/{model}/{method}/` with the call payload, answered by an
//!   [`InstanceReply`].
//! - `POST {host}/api/{model}/batch_{method}/` with a [`BatchRequest`],
//!   answered by a [`BatchReply`] whose `responses[i]` belongs to `requests[i]`.
//!
//! # Gateway endpoint
//!
//! `POST /api/models/{model}/{method}/` answers with a [`CallEnvelope`] on
//! success and an [`ErrorBody`] otherwise.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix of the batch variant of a method on a model instance.
pub const BATCH_METHOD_PREFIX: &str = "batch_";

/// Reply to a single call, either `{"result": ...}` or `{"error": ...}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl InstanceReply {
    pub fn success(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(Value::String(message.into())),
        }
    }

    /// Error message reported by the instance, if any.
    ///
    /// Non-string error values are rendered as JSON.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| match e {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Body of a batch call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub requests: Vec<Value>,
}

/// Reply to a batch call, aligned index-for-index with the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReply {
    pub responses: Vec<InstanceReply>,
}

/// Successful gateway response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    pub model: String,
    pub method: String,
    pub from_cache: bool,
    pub batched: bool,
    /// Creation time (epoch seconds) of the cache entry served, or -1.
    pub cache_time: i64,
    pub result: Value,
}

/// Error body returned by the gateway and by model instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
