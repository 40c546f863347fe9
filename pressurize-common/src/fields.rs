//! Reserved control fields carried in inbound call bodies.
//!
//! Everything else in a call body is domain data owned by the model.

/// Caller identity, excluded from cache identity.
pub const USER_ID: &str = "user_id";
/// Key of the auth token presented by the caller.
pub const AUTH_TOKEN_KEY: &str = "auth_token_key";
/// Secret of the auth token presented by the caller.
pub const AUTH_SECRET: &str = "auth_secret";
/// Per-call flag bypassing the response cache.
pub const NO_CACHE: &str = "no_cache";

/// Fields that must not affect the cache key of a call.
pub const VOLATILE_FIELDS: [&str; 4] = [USER_ID, AUTH_TOKEN_KEY, AUTH_SECRET, NO_CACHE];

/// Fields that never leave the gateway.
pub const CREDENTIAL_FIELDS: [&str; 3] = [AUTH_TOKEN_KEY, AUTH_SECRET, NO_CACHE];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_are_volatile() {
        for field in CREDENTIAL_FIELDS {
            assert!(VOLATILE_FIELDS.contains(&field));
        }
        assert!(!CREDENTIAL_FIELDS.contains(&USER_ID));
    }
}
