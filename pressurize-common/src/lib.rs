//! Pressurize Common Types
//!
//! Shared types used by both the model runner and the API gateway.

pub mod fields;
pub mod protocol;

pub use fields::{AUTH_SECRET, AUTH_TOKEN_KEY, CREDENTIAL_FIELDS, NO_CACHE, USER_ID, VOLATILE_FIELDS};
pub use protocol::{BatchReply, BatchRequest, CallEnvelope, ErrorBody, InstanceReply, BATCH_METHOD_PREFIX};
