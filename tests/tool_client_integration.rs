//! Tool client integration tests against in-process mock tool servers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::{json, Map, Value};

use chatgate_core::security::{RequestSigner, SignedEnvelope, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use chatgate_core::tools::{
    HealthStatus, RetryPolicy, ToolHealthTracker, ToolOwner, MAX_RETRIES_EXCEEDED,
};
use chatgate_core::types::ToolClientConfig;
use chatgate_core::{CredentialVault, ToolCallRequest, ToolInvoker, ToolRegistry};

const MASTER_KEY: &str = "0123456789abcdef0123456789abcdef";
const TOOL_SECRET: &str = "sk_tool_live_7f3a";

#[derive(Default)]
struct ServerState {
    calls: AtomicUsize,
}

/// Bind an axum app on an ephemeral port and return its base URL.
async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn vault() -> Arc<CredentialVault> {
    Arc::new(CredentialVault::new(SecretString::from(MASTER_KEY.to_string())).unwrap())
}

fn fast_config() -> ToolClientConfig {
    ToolClientConfig {
        timeout: Duration::from_millis(200),
        max_retries: 3,
        retry_base_delay: Duration::from_millis(10),
        health_probe_timeout: Duration::from_millis(500),
        ..ToolClientConfig::default()
    }
}

fn invoker() -> ToolInvoker {
    ToolInvoker::new(vault(), fast_config()).unwrap()
}

fn registry() -> ToolRegistry {
    ToolRegistry::new(vault(), fast_config()).unwrap()
}

fn search_request(endpoint: &str) -> ToolCallRequest {
    let mut args = Map::new();
    args.insert("query".to_string(), json!("rust"));
    ToolCallRequest::new(endpoint, "search").with_arguments(args)
}

// =============================================================================
// Invocation
// =============================================================================

#[tokio::test]
async fn test_third_attempt_succeeds_after_two_timeouts() {
    let state = Arc::new(ServerState::default());
    let app = Router::new()
        .route(
            "/tools/call",
            post(|State(state): State<Arc<ServerState>>| async move {
                let n = state.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
                Json(json!({"content": format!("attempt {n}")}))
            }),
        )
        .with_state(state.clone());
    let endpoint = spawn_server(app).await;

    let result = invoker().invoke(&search_request(&endpoint)).await.unwrap();

    assert!(result.success);
    assert_eq!(result.payload, Some(json!("attempt 3")));
    assert_eq!(state.calls.load(Ordering::SeqCst), 3);
    // Two timeouts (200ms each) plus backoff of 10ms and 20ms.
    assert!(result.duration_millis >= 430);
}

#[tokio::test]
async fn test_always_timing_out_exhausts_budget() {
    let state = Arc::new(ServerState::default());
    let app = Router::new()
        .route(
            "/tools/call",
            post(|State(state): State<Arc<ServerState>>| async move {
                state.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(json!({"content": "too late"}))
            }),
        )
        .with_state(state.clone());
    let endpoint = spawn_server(app).await;

    let result = invoker().invoke(&search_request(&endpoint)).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.error_message.as_deref(), Some(MAX_RETRIES_EXCEEDED));
    assert_eq!(result.payload, None);
    // Give any late connection a moment, then confirm no fourth attempt.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_tool_error_is_passed_through_without_retry() {
    let state = Arc::new(ServerState::default());
    let app = Router::new()
        .route(
            "/tools/call",
            post(|State(state): State<Arc<ServerState>>| async move {
                state.calls.fetch_add(1, Ordering::SeqCst);
                Json(json!({"error": {"message": "quota exceeded"}}))
            }),
        )
        .with_state(state.clone());
    let endpoint = spawn_server(app).await;

    let result = invoker().invoke(&search_request(&endpoint)).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.error_message.as_deref(), Some("quota exceeded"));
    assert_eq!(state.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_http_error_fails_fast() {
    let state = Arc::new(ServerState::default());
    let app = Router::new()
        .route(
            "/tools/call",
            post(|State(state): State<Arc<ServerState>>| async move {
                state.calls.fetch_add(1, Ordering::SeqCst);
                (StatusCode::SERVICE_UNAVAILABLE, "upstream overloaded")
            }),
        )
        .with_state(state.clone());
    let endpoint = spawn_server(app).await;

    let result = invoker().invoke(&search_request(&endpoint)).await.unwrap();

    assert!(!result.success);
    assert_eq!(
        result.error_message.as_deref(),
        Some("HTTP 503: upstream overloaded")
    );
    assert_eq!(state.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_result_key_is_accepted() {
    let app = Router::new().route(
        "/tools/call",
        post(|Json(body): Json<Value>| async move {
            Json(json!({"result": {"echo": body["arguments"]["query"]}}))
        }),
    );
    let endpoint = spawn_server(app).await;

    let result = invoker().invoke(&search_request(&endpoint)).await.unwrap();

    assert!(result.success);
    assert_eq!(result.payload, Some(json!({"echo": "rust"})));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_retried_then_fails() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = invoker()
        .invoke(&search_request(&format!("http://{addr}")))
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.error_message.as_deref(), Some(MAX_RETRIES_EXCEEDED));

    let no_transport_retry = ToolInvoker::new(
        vault(),
        ToolClientConfig {
            retry_transport_errors: false,
            ..fast_config()
        },
    )
    .unwrap();
    let result = no_transport_retry
        .invoke(&search_request(&format!("http://{addr}")))
        .await
        .unwrap();
    assert!(!result.success);
    assert!(result
        .error_message
        .unwrap()
        .starts_with("tool server unreachable"));
}

#[tokio::test]
async fn test_signed_request_verifies_server_side() {
    let app = Router::new().route(
        "/tools/call",
        post(|headers: HeaderMap, body: String| async move {
            let header = |name: &str| {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            };
            let envelope = SignedEnvelope {
                timestamp_epoch_seconds: header(HEADER_TIMESTAMP),
                signature_hex: header(HEADER_SIGNATURE),
            };
            let signer = RequestSigner::new(SecretString::from(TOOL_SECRET.to_string()));
            // The endpoint exactly as registered below, trailing slash included.
            let registered = format!("http://{}/", header("host"));
            let verified = signer
                .verify_fresh(
                    &envelope,
                    "POST",
                    &registered,
                    &body,
                    chrono::Utc::now().timestamp(),
                    Duration::from_secs(60),
                )
                .is_ok();
            let bearer = header("authorization") == format!("Bearer {TOOL_SECRET}");
            Json(json!({"content": {"verified": verified, "bearer": bearer}}))
        }),
    );
    let endpoint = spawn_server(app).await;

    let vault = vault();
    let credential = vault
        .encrypt(&SecretString::from(TOOL_SECRET.to_string()))
        .unwrap();
    let invoker = ToolInvoker::new(vault, fast_config()).unwrap();
    let request = search_request(&format!("{endpoint}/")).with_credential(credential);

    let result = invoker.invoke(&request).await.unwrap();

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.payload, Some(json!({"verified": true, "bearer": true})));
}

#[tokio::test]
async fn test_undecryptable_credential_is_a_hard_error() {
    let app = Router::new().route("/tools/call", post(|| async { Json(json!({"content": 1})) }));
    let endpoint = spawn_server(app).await;

    let foreign = CredentialVault::new(SecretString::from("f".repeat(32)))
        .unwrap()
        .encrypt(&SecretString::from(TOOL_SECRET.to_string()))
        .unwrap();
    let request = search_request(&endpoint).with_credential(foreign);

    assert!(matches!(
        invoker().invoke(&request).await,
        Err(chatgate_core::Error::Credential(_))
    ));
}

#[tokio::test]
async fn test_health_tracker_records_final_outcomes() {
    let app = Router::new().route(
        "/tools/call",
        post(|| async { Json(json!({"error": {"message": "bad args"}})) }),
    );
    let endpoint = spawn_server(app).await;

    let tracker = Arc::new(ToolHealthTracker::default());
    let invoker = invoker().with_health_tracker(tracker.clone());
    for _ in 0..5 {
        invoker
            .invoke_with(
                &search_request(&endpoint),
                RetryPolicy {
                    max_retries: 1,
                    retry_base_delay: Duration::ZERO,
                    timeout: Duration::from_millis(500),
                },
            )
            .await
            .unwrap();
    }

    assert_eq!(tracker.status(&endpoint, "search"), HealthStatus::Unhealthy);
    assert_eq!(
        tracker.failure_kinds(&endpoint, "search"),
        vec![("tool_error".to_string(), 5)]
    );
}

// =============================================================================
// Discovery
// =============================================================================

#[tokio::test]
async fn test_discovery_maps_catalogue() {
    let app = Router::new().route(
        "/tools/list",
        post(|headers: HeaderMap| async move {
            let authed = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                == Some("Bearer sk_tool_live_7f3a");
            if !authed {
                return (StatusCode::UNAUTHORIZED, Json(json!({}))).into_response();
            }
            Json(json!({
                "tools": [
                    {"name": "forecast", "description": "Weather forecast",
                     "inputSchema": {"type": "object", "required": ["city"]}},
                    {"name": "alerts"}
                ]
            }))
            .into_response()
        }),
    );
    let endpoint = spawn_server(app).await;

    let vault = vault();
    let credential = vault
        .encrypt(&SecretString::from(TOOL_SECRET.to_string()))
        .unwrap();
    let registry = ToolRegistry::new(vault, fast_config()).unwrap();
    let owner = ToolOwner::new("app-7", "Weather");

    let tools = registry.discover(&endpoint, Some(&credential), &owner).await;

    assert_eq!(tools.len(), 2);
    assert_eq!(tools[0].name, "forecast");
    assert_eq!(tools[0].description, "Weather forecast");
    assert_eq!(tools[0].parameter_schema["required"], json!(["city"]));
    assert_eq!(tools[1].owner_app_id, "app-7");
    assert_eq!(tools[1].owner_app_name, "Weather");

    // Without the credential the server refuses and discovery degrades to empty.
    assert!(registry.discover(&endpoint, None, &owner).await.is_empty());
}

#[tokio::test]
async fn test_discovery_http_500_yields_empty() {
    let app = Router::new().route(
        "/tools/list",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let endpoint = spawn_server(app).await;
    let owner = ToolOwner::new("a", "A");
    assert!(registry().discover(&endpoint, None, &owner).await.is_empty());
}

#[tokio::test]
async fn test_discovery_invalid_json_yields_empty() {
    let app = Router::new().route("/tools/list", post(|| async { "<html>not json</html>" }));
    let endpoint = spawn_server(app).await;
    let owner = ToolOwner::new("a", "A");
    assert!(registry().discover(&endpoint, None, &owner).await.is_empty());
}

#[tokio::test]
async fn test_discovery_unreachable_yields_empty() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let owner = ToolOwner::new("a", "A");
    assert!(registry()
        .discover(&format!("http://{addr}"), None, &owner)
        .await
        .is_empty());
}

// =============================================================================
// Health probe
// =============================================================================

#[tokio::test]
async fn test_probe_reachability() {
    let healthy = spawn_server(Router::new().route("/health", get(|| async { "ok" }))).await;
    // No /health route: 404 still counts as reachable.
    let missing = spawn_server(Router::new()).await;
    let broken = spawn_server(Router::new().route(
        "/health",
        get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    ))
    .await;

    let registry = registry();
    assert!(registry.probe(&healthy).await);
    assert!(registry.probe(&missing).await);
    assert!(!registry.probe(&broken).await);
}
