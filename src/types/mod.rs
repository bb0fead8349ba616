//! Core types shared by the limiter and tool-client subsystems.
//!
//! - **IDs**: Strongly-typed identifiers (InvocationId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Limits, tool client, store and observability settings

mod config;
mod errors;
mod ids;

pub use config::{
    Config, LimitOverride, ObservabilityConfig, RateLimitConfig, StoreConfig, ToolClientConfig,
};
pub use errors::{Error, Result};
pub use ids::InvocationId;
