use serde_json::{Map, Value};

use pressurize_common::{AUTH_SECRET, AUTH_TOKEN_KEY, CREDENTIAL_FIELDS, NO_CACHE, VOLATILE_FIELDS};

use crate::error::GatewayError;

/// A parsed inbound call body: domain fields plus reserved control fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCall {
    body: Map<String, Value>,
}

impl ModelCall {
    /// Parse a call body, which must be a JSON object.
    pub fn parse(bytes: &[u8]) -> Result<Self, GatewayError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| GatewayError::Parse(e.to_string()))?;
        match value {
            Value::Object(body) => Ok(Self { body }),
            _ => Err(GatewayError::Parse(
                "format should be {key: value, key2: value2...}".to_string(),
            )),
        }
    }

    pub fn token_key(&self) -> Option<&str> {
        self.body.get(AUTH_TOKEN_KEY).and_then(Value::as_str)
    }

    pub fn secret(&self) -> Option<&str> {
        self.body.get(AUTH_SECRET).and_then(Value::as_str)
    }

    /// Whether this call bypasses the cache.
    ///
    /// `false` and `null` leave caching on; any other present value sets it.
    pub fn no_cache(&self) -> bool {
        match self.body.get(NO_CACHE) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => *flag,
            Some(_) => true,
        }
    }

    /// The body minus fields that must not affect cache identity.
    pub fn stable_payload(&self) -> Map<String, Value> {
        self.without(&VOLATILE_FIELDS)
    }

    /// The payload sent to the model instance. Credentials stay here.
    pub fn forward_payload(&self) -> Value {
        Value::Object(self.without(&CREDENTIAL_FIELDS))
    }

    fn without(&self, fields: &[&str]) -> Map<String, Value> {
        self.body
            .iter()
            .filter(|(k, _)| !fields.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
