//! Tool invocation with signing, timeout and linear-backoff retry.
//!
//! ```text
//!   ATTEMPT ──success──────────────────────────► DONE(ok)
//!      │ ──tool error / HTTP error / malformed─► DONE(failed)
//!      │ ──timeout / transport error──┬────────► RETRY ──sleep(base * n)──► ATTEMPT
//!      │                              └─(budget spent)─► DONE("max retries exceeded")
//! ```
//!
//! Each attempt runs under a hard deadline; a late response is abandoned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::Instrument;

use super::health::ToolHealthTracker;
use super::types::{ToolCallRequest, ToolCallResult};
use super::{build_http_client, endpoint_url};
use crate::security::{CredentialVault, RequestSigner};
use crate::types::{Error, InvocationId, Result, ToolClientConfig};

pub const MAX_RETRIES_EXCEEDED: &str = "max retries exceeded";
const MALFORMED_RESPONSE: &str = "malformed response from tool server";

/// Outcome of a single attempt.
#[derive(Debug, Clone, PartialEq)]
enum Attempt {
    Success(Option<Value>),
    /// The tool server answered with an error object.
    ToolError(String),
    /// Non-2xx status.
    Http(String),
    Malformed,
    Timeout,
    Transport(String),
}

impl Attempt {
    fn to_error(&self) -> Error {
        match self {
            Attempt::Success(_) => Error::internal("successful attempt is not an error"),
            Attempt::ToolError(m) => Error::tool_error(m.clone()),
            Attempt::Http(m) => Error::malformed(m.clone()),
            Attempt::Malformed => Error::malformed(MALFORMED_RESPONSE),
            Attempt::Timeout => Error::timeout("attempt deadline exceeded"),
            Attempt::Transport(m) => Error::unreachable(m.clone()),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Attempt::Success(_) => "success",
            Attempt::ToolError(_) => "tool_error",
            Attempt::Http(_) => "http",
            Attempt::Malformed => "malformed",
            Attempt::Timeout => "timeout",
            Attempt::Transport(_) => "transport",
        }
    }
}

/// Decrypted credential for one invocation: bearer token and signing key.
struct CallAuth {
    bearer: SecretString,
    signer: RequestSigner,
}

impl CallAuth {
    fn new(secret: SecretString) -> Self {
        let signer = RequestSigner::new(SecretString::from(secret.expose_secret().to_string()));
        Self {
            bearer: secret,
            signer,
        }
    }
}

/// Per-call retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts; zero is treated as one.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub timeout: Duration,
}

impl From<&ToolClientConfig> for RetryPolicy {
    fn from(config: &ToolClientConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay,
            timeout: config.timeout,
        }
    }
}

/// Dispatches tool calls and normalizes their results.
#[derive(Debug, Clone)]
pub struct ToolInvoker {
    client: Client,
    vault: Arc<CredentialVault>,
    config: ToolClientConfig,
    health: Option<Arc<ToolHealthTracker>>,
}

impl ToolInvoker {
    pub fn new(vault: Arc<CredentialVault>, config: ToolClientConfig) -> Result<Self> {
        Ok(Self {
            client: build_http_client(&config)?,
            vault,
            config,
            health: None,
        })
    }

    pub fn with_client(vault: Arc<CredentialVault>, config: ToolClientConfig, client: Client) -> Self {
        Self {
            client,
            vault,
            config,
            health: None,
        }
    }

    /// Record every final outcome into `tracker`.
    pub fn with_health_tracker(mut self, tracker: Arc<ToolHealthTracker>) -> Self {
        self.health = Some(tracker);
        self
    }

    pub fn health_tracker(&self) -> Option<&Arc<ToolHealthTracker>> {
        self.health.as_ref()
    }

    /// Invoke with the configured retry policy.
    pub async fn invoke(&self, request: &ToolCallRequest) -> Result<ToolCallResult> {
        self.invoke_with(request, RetryPolicy::from(&self.config)).await
    }

    /// Invoke a tool.
    ///
    /// Every transport, status and parsing failure is folded into a failed
    /// [`ToolCallResult`]. The only error returned is a credential that cannot
    /// be decrypted.
    pub async fn invoke_with(
        &self,
        request: &ToolCallRequest,
        policy: RetryPolicy,
    ) -> Result<ToolCallResult> {
        let invocation_id = InvocationId::new();
        let span = tracing::info_span!(
            "tool_invocation",
            invocation_id = %invocation_id,
            tool = %request.tool_name,
            endpoint = %request.endpoint,
        );
        self.run(request, policy).instrument(span).await
    }

    async fn run(&self, request: &ToolCallRequest, policy: RetryPolicy) -> Result<ToolCallResult> {
        let auth = match &request.credential {
            Some(credential) => Some(CallAuth::new(self.vault.decrypt(credential)?)),
            None => None,
        };
        let body = serde_json::to_string(&request.wire_body())?;

        let started = Instant::now();
        let attempts = policy.max_retries.max(1);
        let mut attempt_number = 0u32;

        let (outcome, final_kind) = loop {
            attempt_number += 1;
            let outcome = self
                .attempt(request, &body, auth.as_ref(), policy.timeout)
                .await;

            let retryable = match &outcome {
                Attempt::Timeout => true,
                Attempt::Transport(_) => self.config.retry_transport_errors,
                _ => false,
            };
            if !retryable {
                let kind = outcome.kind();
                break (outcome, kind);
            }

            if attempt_number >= attempts {
                tracing::warn!(
                    error = %Error::MaxRetriesExceeded { attempts: attempt_number },
                    last_failure = outcome.kind(),
                    "tool_invocation_retries_exhausted"
                );
                break (
                    Attempt::Transport(MAX_RETRIES_EXCEEDED.to_string()),
                    "max_retries",
                );
            }

            let delay = policy.retry_base_delay.saturating_mul(attempt_number);
            tracing::warn!(
                attempt = attempt_number,
                failure = outcome.kind(),
                error = %outcome.to_error(),
                delay_ms = delay.as_millis() as u64,
                "tool_invocation_retrying"
            );
            tokio::time::sleep(delay).await;
        };

        let duration_millis = started.elapsed().as_millis() as u64;
        let result = match outcome {
            Attempt::Success(payload) => ToolCallResult::succeeded(payload, duration_millis),
            Attempt::ToolError(message) | Attempt::Http(message) | Attempt::Transport(message) => {
                ToolCallResult::failed(message, duration_millis)
            }
            Attempt::Malformed => ToolCallResult::failed(MALFORMED_RESPONSE, duration_millis),
            Attempt::Timeout => ToolCallResult::failed(MAX_RETRIES_EXCEEDED, duration_millis),
        };

        if let Some(tracker) = &self.health {
            tracker.record(
                &request.endpoint,
                &request.tool_name,
                result.success,
                duration_millis,
                (!result.success).then_some(final_kind),
            );
        }

        if result.success {
            tracing::info!(attempts = attempt_number, duration_millis, "tool_invocation_succeeded");
        } else {
            tracing::info!(
                attempts = attempt_number,
                duration_millis,
                failure = final_kind,
                "tool_invocation_failed"
            );
        }
        Ok(result)
    }

    async fn attempt(
        &self,
        request: &ToolCallRequest,
        body: &str,
        auth: Option<&CallAuth>,
        timeout: Duration,
    ) -> Attempt {
        let mut builder = self
            .client
            .post(endpoint_url(&request.endpoint, "tools/call"))
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string());

        if let Some(auth) = auth {
            match auth.signer.sign_now("POST", &request.endpoint, body) {
                Ok(envelope) => {
                    for (name, value) in envelope.headers() {
                        builder = builder.header(name, value);
                    }
                }
                Err(e) => return Attempt::Transport(format!("request signing failed: {e}")),
            }
            builder = builder.header(
                AUTHORIZATION,
                format!("Bearer {}", auth.bearer.expose_secret()),
            );
        }

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Err(_) => Attempt::Timeout,
            Ok(Err(e)) if e.is_timeout() => Attempt::Timeout,
            Ok(Err(e)) => Attempt::Transport(format!(
                "tool server unreachable: {}",
                e.without_url()
            )),
            Ok(Ok((status, text))) => {
                interpret_response(status, &text, self.config.max_error_body_chars)
            }
        }
    }
}

/// Normalize one HTTP exchange.
///
/// Non-2xx statuses fail fast with `HTTP {code}: {body prefix}`. On 2xx an
/// `error` object is passed through; otherwise `content` wins over `result`.
fn interpret_response(status: StatusCode, text: &str, max_error_chars: usize) -> Attempt {
    if !status.is_success() {
        let prefix: String = text.chars().take(max_error_chars).collect();
        return Attempt::Http(format!("HTTP {}: {}", status.as_u16(), prefix));
    }

    let Ok(Value::Object(mut body)) = serde_json::from_str::<Value>(text) else {
        return Attempt::Malformed;
    };

    if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
        let message = match error {
            Value::Object(fields) => fields
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            Value::String(s) => Some(s.clone()),
            _ => None,
        };
        return Attempt::ToolError(
            message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "unknown error".to_string()),
        );
    }

    let payload = ["content", "result"]
        .into_iter()
        .find_map(|key| body.remove(key).filter(|v| !v.is_null()));
    Attempt::Success(payload)
}
