//! Tool protocol records: discovered descriptors and call request/result.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::security::Credential;

/// App that owns a tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOwner {
    pub app_id: String,
    pub app_name: String,
}

impl ToolOwner {
    pub fn new(app_id: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_name: app_name.into(),
        }
    }
}

/// Snapshot of one remote tool as reported by discovery.
///
/// `parameter_schema` is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameter_schema: Value,
    pub owner_app_id: String,
    pub owner_app_name: String,
}

/// A call to dispatch against a tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub endpoint: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<Credential>,
}

impl ToolCallRequest {
    pub fn new(endpoint: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            tool_name: tool_name.into(),
            arguments: Map::new(),
            credential: None,
        }
    }

    pub fn with_arguments(mut self, arguments: Map<String, Value>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Wire body for `POST /tools/call`.
    pub fn wire_body(&self) -> Value {
        serde_json::json!({
            "name": self.tool_name,
            "arguments": self.arguments,
        })
    }
}

/// Normalized outcome of an invocation.
///
/// A failed result always carries a non-empty `error_message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_millis: u64,
}

impl ToolCallResult {
    pub fn succeeded(payload: Option<Value>, duration_millis: u64) -> Self {
        Self {
            success: true,
            payload,
            error_message: None,
            duration_millis,
        }
    }

    pub fn failed(message: impl Into<String>, duration_millis: u64) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            "unknown error".to_string()
        } else {
            message
        };
        Self {
            success: false,
            payload: None,
            error_message: Some(message),
            duration_millis,
        }
    }
}
