//! HTTP boundary for the market proxy
//!
//! The proxy serves the same path shape as the upstream market
//! (`/MineOSAPI/2.04/<script>`), so existing MineOS clients only repoint
//! their host. Handlers fold each request into a cache identifier, ask the
//! coordinator for the payload and render it back into an HTTP response.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Form, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::proxy::{ProxyCoordinator, ProxyError};
use crate::record::Value;
use crate::store::InvalidIdentifier;
use crate::upstream::RequestKey;

/// Path prefix the upstream market serves its API under
pub const API_PREFIX: &str = "/MineOSAPI/2.04";

/// Shared state handed to every request handler
pub struct AppState {
    coordinator: ProxyCoordinator,
}

impl AppState {
    /// Wraps a coordinator for sharing across handlers
    pub fn new(coordinator: ProxyCoordinator) -> Self {
        Self { coordinator }
    }
}

/// HTTP error with a JSON body in the market's `success`/`reason` shape
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "reason": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<InvalidIdentifier> for ApiError {
    fn from(err: InvalidIdentifier) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::UpstreamUnavailable(_) => Self::bad_gateway(err.to_string()),
            ProxyError::Store(_) => {
                error!(error = %err, "Request failed on cache storage");
                Self::internal("Internal cache failure")
            }
        }
    }
}

/// Creates the router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest(API_PREFIX, market_routes())
        .with_state(state)
}

fn market_routes() -> Router<Arc<AppState>> {
    Router::new().route("/:script", get(market_script).post(market_script))
}

/// Health check endpoint
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Serves one market script through the cache
async fn market_script(
    State(state): State<Arc<AppState>>,
    Path(script): Path<String>,
    Query(query): Query<Vec<(String, String)>>,
    form: Option<Form<Vec<(String, String)>>>,
) -> Result<Response, ApiError> {
    let form_pairs = form.map(|Form(pairs)| pairs).unwrap_or_default();

    // Form values win over query values on conflicting keys
    let key = RequestKey::new(&script, query.into_iter().chain(form_pairs))?;
    let id = key.to_script_id()?;

    debug!(id = %id, "Proxying market request");
    let payload = state.coordinator.get(&id).await?;

    Ok(render_payload(payload))
}

/// Renders a cached payload as an HTTP response
///
/// Structured payloads become JSON; plain text and raw bytes pass through
/// with matching content types.
fn render_payload(payload: Value) -> Response {
    match payload {
        Value::Text(text) => {
            ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response()
        }
        Value::Bytes(bytes) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        other => Json(other.to_json()).into_response(),
    }
}

/// Binds the listener and serves until interrupted
pub async fn run(addr: SocketAddr, state: Arc<AppState>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Market proxy listening");

    let router = create_router(state).layer(TraceLayer::new_for_http());

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down from interrupt");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::freshness::{FreshnessPolicy, ManualClock};
    use crate::store::{CacheStore, ScriptId};
    use crate::upstream::{FetchError, UpstreamFetcher};
    use async_trait::async_trait;

    /// Returns a fixed payload and records the identifiers asked for
    struct CapturingFetcher {
        payload: Value,
        seen: Mutex<Vec<ScriptId>>,
    }

    impl CapturingFetcher {
        fn new(payload: Value) -> Self {
            Self {
                payload,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl UpstreamFetcher for CapturingFetcher {
        async fn fetch(&self, id: &ScriptId) -> Result<Value, FetchError> {
            self.seen
                .lock()
                .expect("Lock should not be poisoned")
                .push(id.clone());
            Ok(self.payload.clone())
        }
    }

    struct DownFetcher;

    #[async_trait]
    impl UpstreamFetcher for DownFetcher {
        async fn fetch(&self, _id: &ScriptId) -> Result<Value, FetchError> {
            Err(FetchError::Unavailable("connection refused".to_string()))
        }
    }

    fn test_app(fetcher: Arc<dyn UpstreamFetcher>) -> (Router, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = CacheStore::open(temp_dir.path()).expect("Failed to open store");
        let coordinator = ProxyCoordinator::with_clock(
            store,
            FreshnessPolicy::new(Duration::from_secs(3600)),
            fetcher,
            Arc::new(ManualClock::new(1_000_000)),
        );

        (create_router(Arc::new(AppState::new(coordinator))), temp_dir)
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body")
            .to_vec()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _temp_dir) = test_app(Arc::new(DownFetcher));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body, serde_json::json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_get_script_returns_json_payload() {
        let payload = Value::from_json(serde_json::json!({
            "success": true,
            "result": [1, 2, 3],
        }));
        let (app, _temp_dir) = test_app(Arc::new(CapturingFetcher::new(payload)));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/MineOSAPI/2.04/statistics.php")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body, serde_json::json!({ "success": true, "result": [1, 2, 3] }));
    }

    #[tokio::test]
    async fn test_text_payload_is_served_as_plain_text() {
        let (app, _temp_dir) = test_app(Arc::new(CapturingFetcher::new(Value::from("pong"))));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/MineOSAPI/2.04/verify.php")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("text/plain; charset=utf-8")
        );
        assert_eq!(body_bytes(response).await, b"pong");
    }

    #[tokio::test]
    async fn test_post_form_parameters_reach_the_identifier() {
        let fetcher = Arc::new(CapturingFetcher::new(Value::from("ok")));
        let (app, _temp_dir) = test_app(fetcher.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/MineOSAPI/2.04/publication.php")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("file_id=308&language_id=18"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let expected = RequestKey::new(
            "publication",
            vec![
                ("file_id".to_string(), "308".to_string()),
                ("language_id".to_string(), "18".to_string()),
            ],
        )
        .unwrap()
        .to_script_id()
        .unwrap();

        let seen = fetcher.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[expected]);
    }

    #[tokio::test]
    async fn test_form_values_override_query_values() {
        let fetcher = Arc::new(CapturingFetcher::new(Value::from("ok")));
        let (app, _temp_dir) = test_app(fetcher.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/MineOSAPI/2.04/list.php?lang=en&page=1")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("lang=ru"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let expected = RequestKey::new(
            "list",
            vec![
                ("lang".to_string(), "ru".to_string()),
                ("page".to_string(), "1".to_string()),
            ],
        )
        .unwrap()
        .to_script_id()
        .unwrap();

        let seen = fetcher.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[expected]);
    }

    #[tokio::test]
    async fn test_invalid_script_name_is_rejected() {
        let fetcher = Arc::new(CapturingFetcher::new(Value::from("never")));
        let (app, _temp_dir) = test_app(fetcher.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/MineOSAPI/2.04/bad%20script")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["success"], serde_json::json!(false));

        assert!(
            fetcher.seen.lock().unwrap().is_empty(),
            "Invalid identifiers must never reach the upstream"
        );
    }

    #[tokio::test]
    async fn test_upstream_failure_with_empty_cache_is_bad_gateway() {
        let (app, _temp_dir) = test_app(Arc::new(DownFetcher));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/MineOSAPI/2.04/statistics.php")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["success"], serde_json::json!(false));
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let (app, _temp_dir) = test_app(Arc::new(DownFetcher));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/somewhere/else")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
