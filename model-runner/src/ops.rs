//! Built-in model operations.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// What a configured method does with a call payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// `{"number": data.number + 1}`
    Increment,
    /// Returns `data` unchanged.
    Echo,
}

impl Operation {
    pub fn apply(&self, payload: &Value) -> Result<Value> {
        let data = payload.get("data").ok_or(Error::MissingData)?;
        match self {
            Operation::Increment => {
                let number = &data["number"];
                if let Some(n) = number.as_i64() {
                    let next = n
                        .checked_add(1)
                        .ok_or_else(|| Error::OperationFailed(format!("{} + 1 overflows", n)))?;
                    Ok(json!({ "number": next }))
                } else if let Some(n) = number.as_f64() {
                    Ok(json!({ "number": n + 1.0 }))
                } else {
                    Err(Error::OperationFailed("data.number must be a number".to_string()))
                }
            }
            Operation::Echo => Ok(data.clone()),
        }
    }
}
