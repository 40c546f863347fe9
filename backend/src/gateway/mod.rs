//! The request dispatch pipeline.
//!
//! This module provides:
//! - Model registry with per-model batching and cache settings
//! - Downstream client for model instances
//! - Batch coalescer merging concurrent calls per (model, method)
//! - Request dispatcher tying auth, cache and dispatch together

pub mod batch_queue;
pub mod dispatcher;
pub mod registry;
pub mod router;
pub mod stats;

pub use batch_queue::{BatchKey, BatchQueue};
pub use dispatcher::RequestDispatcher;
pub use registry::{BatchSettings, ModelRegistry, RegisteredModel};
pub use router::{InstanceRouter, ModelBackend};
pub use stats::{GatewayStats, StatsSnapshot};
