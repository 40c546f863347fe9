//! Model runner - a model instance serving single and batched method calls
//! for the pressurize gateway.

pub mod api;
pub mod config;
pub mod error;
pub mod ops;
pub mod state;

pub use config::Config;
pub use state::AppState;
