//! Tool-server client: discovery, signed invocation, health tracking.
//!
//! Tool servers expose two calls under a shared contract:
//! - `POST {endpoint}/tools/list` returns `{"tools": [...]}`
//! - `POST {endpoint}/tools/call` takes `{"name", "arguments"}` and returns
//!   `{"content"}`, `{"result"}` or `{"error": {"message"}}`

pub mod health;
pub mod invoker;
pub mod registry;
pub mod types;

pub use health::{HealthConfig, HealthStatus, ToolHealthReport, ToolHealthTracker};
pub use invoker::{RetryPolicy, ToolInvoker, MAX_RETRIES_EXCEEDED};
pub use registry::ToolRegistry;
pub use types::{ToolCallRequest, ToolCallResult, ToolDescriptor, ToolOwner};

use reqwest::Client;

use crate::types::{Error, Result, ToolClientConfig};

/// HTTP client shared by discovery and invocation. Per-request deadlines are
/// enforced by the callers; the client only bounds connection setup.
pub fn build_http_client(config: &ToolClientConfig) -> Result<Client> {
    Client::builder()
        .connect_timeout(config.timeout)
        .build()
        .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))
}

/// `{endpoint}/{path}` without doubled slashes.
pub(crate) fn endpoint_url(endpoint: &str, path: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), path)
}
