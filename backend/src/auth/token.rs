use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::models::ModelCall;
use crate::store::{AuthToken, StoreError, TokenStore};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No authentication token provided")]
    MissingToken,
    #[error("No authentication secret provided")]
    MissingSecret,
    #[error("Could not find token {0}")]
    UnknownToken(String),
    #[error("Invalid authentication token.")]
    InvalidCredentials,
    #[error("Token store unavailable: {0}")]
    Store(#[from] StoreError),
}

impl AuthError {
    /// True when the failure came from the token store rather than the caller.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, AuthError::Store(_))
    }
}

/// Checks (token key, secret) pairs against the token store.
///
/// Expiry is the only invalidation mechanism; there is no revocation list.
pub struct TokenValidator {
    store: Arc<dyn TokenStore>,
}

impl TokenValidator {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Valid iff the stored secret matches exactly and `expires > now`.
    ///
    /// Fails when the key is unknown or the store is unreachable.
    pub fn validate(&self, key: &str, secret: &str) -> Result<bool, AuthError> {
        let token = self
            .store
            .lookup_token(key)?
            .ok_or_else(|| AuthError::UnknownToken(key.to_string()))?;

        let now = Utc::now().timestamp();
        Ok(secrets_match(&token.secret, secret) && token.expires > now)
    }

    /// Store a token expiring `lifetime_secs` from now. Negative lifetimes
    /// produce an already-expired token.
    pub fn create_token(
        &self,
        key: &str,
        secret: &str,
        lifetime_secs: i64,
    ) -> Result<AuthToken, AuthError> {
        let token = AuthToken {
            key: key.to_string(),
            secret: secret.to_string(),
            expires: Utc::now().timestamp().saturating_add(lifetime_secs),
        };
        self.store.put_token(&token)?;
        tracing::info!("Created token {} expiring at {}", token.key, token.expires);
        Ok(token)
    }

    /// Check the credentials carried in a call body.
    pub fn authenticate(&self, call: &ModelCall) -> Result<(), AuthError> {
        let key = call.token_key().ok_or(AuthError::MissingToken)?;
        let secret = call.secret().ok_or(AuthError::MissingSecret)?;

        if self.validate(key, secret)? {
            Ok(())
        } else {
            tracing::debug!("Rejected credentials for token {}", key);
            Err(AuthError::InvalidCredentials)
        }
    }
}

/// Constant-time comparison over fixed-length digests.
fn secrets_match(stored: &str, presented: &str) -> bool {
    let a = Sha256::digest(stored.as_bytes());
    let b = Sha256::digest(presented.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use serde_json::json;

    struct UnreachableStore;

    impl TokenStore for UnreachableStore {
        fn lookup_token(&self, _key: &str) -> Result<Option<AuthToken>, StoreError> {
            Err(StoreError::DatabaseError("connection refused".to_string()))
        }

        fn put_token(&self, _token: &AuthToken) -> Result<(), StoreError> {
            Err(StoreError::DatabaseError("connection refused".to_string()))
        }
    }

    fn validator() -> TokenValidator {
        TokenValidator::new(Arc::new(SqliteStore::in_memory().unwrap()))
    }

    fn call(value: serde_json::Value) -> ModelCall {
        ModelCall::parse(value.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn test_expired_token_rejected() {
        let v = validator();
        let token = v.create_token("test_token", "mysecret", -400).unwrap();
        assert!(token.expires < Utc::now().timestamp());
        assert!(!v.validate("test_token", "mysecret").unwrap());
    }

    #[test]
    fn test_live_token_accepted() {
        let v = validator();
        v.create_token("test_token2", "mysecret", 400_000).unwrap();
        assert!(v.validate("test_token2", "mysecret").unwrap());
    }

    #[test]
    fn test_wrong_secret_rejected_regardless_of_expiry() {
        let v = validator();
        v.create_token("live", "mysecret", 400_000).unwrap();
        v.create_token("dead", "mysecret", -400).unwrap();
        assert!(!v.validate("live", "other").unwrap());
        assert!(!v.validate("dead", "other").unwrap());
        assert!(!v.validate("live", "mysecret ").unwrap());
    }

    #[test]
    fn test_huge_lifetime_saturates() {
        let v = validator();
        let token = v.create_token("forever", "s", i64::MAX).unwrap();
        assert_eq!(token.expires, i64::MAX);
        assert!(v.validate("forever", "s").unwrap());

        let token = v.create_token("never", "s", i64::MIN).unwrap();
        assert_eq!(token.expires, i64::MIN);
        assert!(!v.validate("never", "s").unwrap());
    }

    #[test]
    fn test_zero_lifetime_is_expired() {
        let v = validator();
        v.create_token("now", "s", 0).unwrap();
        assert!(!v.validate("now", "s").unwrap());
    }

    #[test]
    fn test_unknown_token_errors() {
        let v = validator();
        let err = v.validate("nobody", "s").unwrap_err();
        assert!(matches!(err, AuthError::UnknownToken(ref k) if k == "nobody"));
        assert!(!err.is_store_failure());
    }

    #[test]
    fn test_store_failure_surfaces() {
        let v = TokenValidator::new(Arc::new(UnreachableStore));
        let err = v.validate("K", "S").unwrap_err();
        assert!(err.is_store_failure());
    }

    #[test]
    fn test_authenticate_call() {
        let v = validator();
        v.create_token("K", "S", 3600).unwrap();

        assert!(v
            .authenticate(&call(json!({"auth_token_key": "K", "auth_secret": "S"})))
            .is_ok());
        assert!(matches!(
            v.authenticate(&call(json!({"auth_secret": "S"}))),
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(
            v.authenticate(&call(json!({"auth_token_key": "K"}))),
            Err(AuthError::MissingSecret)
        ));
        assert!(matches!(
            v.authenticate(&call(json!({"auth_token_key": "K", "auth_secret": "nope"}))),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("abc", "abc"));
        assert!(!secrets_match("abc", "abd"));
        assert!(!secrets_match("abc", "abcd"));
        assert!(!secrets_match("", "a"));
    }
}
