//! Tool discovery.
//!
//! `discover` never fails: network errors, non-2xx statuses and malformed
//! catalogues all degrade to an empty list, logged at warn. An app with no
//! discovered tools is valid, just unusable for routing.

use std::sync::Arc;

use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::Value;

use super::types::{ToolDescriptor, ToolOwner};
use super::{build_http_client, endpoint_url};
use crate::security::{Credential, CredentialVault};
use crate::types::{Error, Result, ToolClientConfig};

#[derive(Debug, Deserialize)]
struct ListToolsResponse {
    #[serde(default)]
    tools: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RemoteTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    input_schema: Option<Value>,
}

/// Discovers remote tool catalogues.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    client: Client,
    vault: Arc<CredentialVault>,
    config: ToolClientConfig,
}

impl ToolRegistry {
    pub fn new(vault: Arc<CredentialVault>, config: ToolClientConfig) -> Result<Self> {
        Ok(Self {
            client: build_http_client(&config)?,
            vault,
            config,
        })
    }

    /// Share an existing client (and its connection pool).
    pub fn with_client(vault: Arc<CredentialVault>, config: ToolClientConfig, client: Client) -> Self {
        Self {
            client,
            vault,
            config,
        }
    }

    /// Fetch the tool catalogue of `endpoint`.
    pub async fn discover(
        &self,
        endpoint: &str,
        credential: Option<&Credential>,
        owner: &ToolOwner,
    ) -> Vec<ToolDescriptor> {
        match self.try_discover(endpoint, credential, owner).await {
            Ok(tools) => {
                tracing::info!(
                    endpoint,
                    app_id = %owner.app_id,
                    count = tools.len(),
                    "tools_discovered"
                );
                tools
            }
            Err(e) => {
                tracing::warn!(endpoint, app_id = %owner.app_id, error = %e, "tool_discovery_failed");
                Vec::new()
            }
        }
    }

    async fn try_discover(
        &self,
        endpoint: &str,
        credential: Option<&Credential>,
        owner: &ToolOwner,
    ) -> Result<Vec<ToolDescriptor>> {
        let mut request = self
            .client
            .post(endpoint_url(endpoint, "tools/list"))
            .json(&serde_json::json!({}));
        if let Some(credential) = credential {
            let secret = self.vault.decrypt(credential)?;
            request = request.header(AUTHORIZATION, format!("Bearer {}", secret.expose_secret()));
        }

        let response = tokio::time::timeout(self.config.timeout, request.send())
            .await
            .map_err(|_| Error::timeout(format!("discovery exceeded {:?}", self.config.timeout)))?
            .map_err(|e| Error::unreachable(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::malformed(format!("discovery returned HTTP {}", status.as_u16())));
        }

        let body = tokio::time::timeout(self.config.timeout, response.bytes())
            .await
            .map_err(|_| Error::timeout("discovery body read timed out"))?
            .map_err(|e| Error::unreachable(e.without_url().to_string()))?;
        let listing: ListToolsResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::malformed(format!("invalid discovery response: {e}")))?;

        Ok(parse_catalogue(listing.tools, owner))
    }

    /// `GET {endpoint}/health`; reachable means any status below 500.
    pub async fn probe(&self, endpoint: &str) -> bool {
        let request = self.client.get(endpoint_url(endpoint, "health")).send();
        match tokio::time::timeout(self.config.health_probe_timeout, request).await {
            Ok(Ok(response)) => response.status().as_u16() < 500,
            Ok(Err(e)) => {
                tracing::debug!(endpoint, error = %e.without_url(), "endpoint_probe_failed");
                false
            }
            Err(_) => {
                tracing::debug!(endpoint, "endpoint_probe_timed_out");
                false
            }
        }
    }
}

/// Map raw catalogue entries to descriptors. Entries without a string `name`
/// are skipped.
fn parse_catalogue(entries: Vec<Value>, owner: &ToolOwner) -> Vec<ToolDescriptor> {
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<RemoteTool>(entry) {
            Ok(tool) => Some(ToolDescriptor {
                name: tool.name,
                description: tool.description.unwrap_or_default(),
                parameter_schema: tool
                    .input_schema
                    .unwrap_or_else(|| Value::Object(Default::default())),
                owner_app_id: owner.app_id.clone(),
                owner_app_name: owner.app_name.clone(),
            }),
            Err(e) => {
                tracing::debug!(error = %e, "skipping_malformed_tool_entry");
                None
            }
        })
        .collect()
}
