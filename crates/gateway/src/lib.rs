//! HTTP API gateway for docuchat.
//!
//! Exposes documents, chats, context selection, and a streaming send
//! endpoint over REST + SSE.
//!
//! Security layers:
//! - Pairing-code handshake (`POST /pair`) issuing bearer tokens
//! - Bearer token authentication on all `/api` routes
//! - CORS with an explicit origin policy
//! - Request body size limit (configurable, uploads are base64 JSON)
//! - In-memory rate limiting (60 req/min per client)
//! - HTTP trace logging

pub mod api;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware::{self, Next},
    response::Json,
    routing::{get, post},
};
use docuchat_core::message::ChatId;
use docuchat_core::provider::Provider;
use docuchat_session::ChatSession;
use docuchat_store::Store;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// The single local tenant. Uploads and chats all belong to this user until
/// a real account system exists.
pub const LOCAL_USER: &str = "local";

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: docuchat_config::AppConfig,
    pub store: Arc<Store>,
    pub provider: Arc<dyn Provider>,
    pub pairing_code: Option<String>,
    pub bearer_tokens: RwLock<Vec<String>>,
    /// Live chat sessions, keyed by chat id. Persisted chats not in this
    /// map are resumed from the store on first touch.
    pub sessions: RwLock<HashMap<ChatId, Arc<ChatSession>>>,
}

pub type SharedState = Arc<GatewayState>;

/// Build the full router: health + pairing, the authenticated `/api`
/// surface, and the middleware stack.
pub fn build_router(state: SharedState) -> Router {
    let max_body = state.config.gateway.max_upload_bytes;

    let api = api::api_router(state.clone())
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::AllowOrigin::exact(
            "http://localhost:8080".parse().expect("static origin"),
        ))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .max_age(std::time::Duration::from_secs(3600));

    let rate_limiter = Arc::new(RateLimiter::new(60, std::time::Duration::from_secs(60)));

    Router::new()
        .route("/health", get(health_handler))
        .route("/pair", post(pair_handler))
        .with_state(state)
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(max_body))
        .layer(middleware::from_fn(move |req, next| {
            let limiter = rate_limiter.clone();
            rate_limit_middleware(limiter, req, next)
        }))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(
    config: docuchat_config::AppConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let host = config.gateway.host.clone();
    let port = config.gateway.port;
    let addr = format!("{host}:{port}");

    let pairing_code = if config.gateway.require_pairing {
        let code = format!("{:08}", rand_code());
        info!(code = %code, "Pairing code generated — use POST /pair with X-Pairing-Code header");
        Some(code)
    } else {
        None
    };

    let store = Arc::new(Store::open(&config.database.path).await?);
    // A missing API key fails AI-dependent requests, not the whole server
    let provider = docuchat_providers::from_config(&config);

    let state = Arc::new(GatewayState {
        config,
        store,
        provider,
        pairing_code,
        bearer_tokens: RwLock::new(Vec::new()),
        sessions: RwLock::new(HashMap::new()),
    });

    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Rate Limiter ---

/// Simple in-memory sliding-window rate limiter.
///
/// Tracks request timestamps per client key (bearer token or "anonymous").
/// Thread-safe via `std::sync::Mutex` (non-async, held briefly).
struct RateLimiter {
    max_requests: usize,
    window: std::time::Duration,
    clients: std::sync::Mutex<HashMap<String, Vec<std::time::Instant>>>,
}

impl RateLimiter {
    fn new(max_requests: usize, window: std::time::Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Check if the client is within rate limits. Returns `true` if allowed.
    fn check(&self, client_key: &str) -> bool {
        let now = std::time::Instant::now();
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());

        // Evict stale entries if the map grows too large
        if clients.len() > 10_000 {
            clients.retain(|_, timestamps| {
                timestamps
                    .last()
                    .is_some_and(|t| now.duration_since(*t) < self.window)
            });
        }

        let timestamps = clients.entry(client_key.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.max_requests {
            return false;
        }

        timestamps.push(now);
        true
    }
}

/// Returns 429 Too Many Requests when the window is exhausted. The /health
/// endpoint is exempt so monitoring can poll it freely.
async fn rate_limit_middleware(
    limiter: Arc<RateLimiter>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let client_key = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "anonymous".to_string());

    if !limiter.check(&client_key) {
        warn!(client = %client_key.chars().take(20).collect::<String>(), "Rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(req).await)
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct PairResponse {
    token: String,
}

async fn pair_handler(
    State(state): State<SharedState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<PairResponse>, StatusCode> {
    if let Some(expected) = state.pairing_code.as_deref() {
        let provided = headers.get("X-Pairing-Code").and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    let token = uuid::Uuid::new_v4().to_string();

    let mut tokens = state.bearer_tokens.write().await;

    // Limit active tokens — evict oldest when at capacity
    const MAX_TOKENS: usize = 100;
    if tokens.len() >= MAX_TOKENS {
        tokens.remove(0);
    }
    tokens.push(token.clone());

    Ok(Json(PairResponse { token }))
}

/// Generate a cryptographically strong 8-digit pairing code.
fn rand_code() -> u32 {
    use rand::Rng;
    let mut rng = rand::rng();
    rng.random_range(10_000_000..100_000_000)
}

/// Authentication middleware for the `/api` surface.
///
/// Requires a valid `Authorization: Bearer <token>` header once at least one
/// token has been issued; before pairing, access is open (local-only bind).
async fn auth_middleware(
    State(state): State<SharedState>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    let tokens = state.bearer_tokens.read().await;

    if tokens.is_empty() {
        drop(tokens);
        return Ok(next.run(req).await);
    }

    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match auth_header {
        Some(token) if tokens.iter().any(|t| t == token) => {
            drop(tokens);
            Ok(next.run(req).await)
        }
        _ => {
            warn!("Unauthorized request to /api — missing or invalid bearer token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(api::tests::test_state(None).await);

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn pairing_issues_token_for_correct_code() {
        let app = build_router(api::tests::test_state(Some("12345678")).await);

        let req = Request::builder()
            .method("POST")
            .uri("/pair")
            .header("X-Pairing-Code", "12345678")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(!json["token"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pairing_rejects_wrong_code() {
        let app = build_router(api::tests::test_state(Some("12345678")).await);

        let req = Request::builder()
            .method("POST")
            .uri("/pair")
            .header("X-Pairing-Code", "00000000")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn rate_limiter_enforces_window_per_client() {
        let limiter = RateLimiter::new(3, std::time::Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.check("client-a"));
        }
        assert!(!limiter.check("client-a"));
        // Other clients have their own window
        assert!(limiter.check("client-b"));
    }

    #[tokio::test]
    async fn sixty_first_request_gets_429_but_health_stays_up() {
        let app = build_router(api::tests::test_state(None).await);

        for _ in 0..60 {
            let req = Request::builder()
                .uri("/api/documents")
                .body(Body::empty())
                .unwrap();
            let response = app.clone().oneshot(req).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let req = Request::builder()
            .uri("/api/documents")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn pairing_evicts_oldest_token_at_capacity() {
        let state = api::tests::test_state(None).await;

        let mut first = String::new();
        let mut last = String::new();
        for i in 0..101 {
            let Json(resp) = pair_handler(State(state.clone()), axum::http::HeaderMap::new())
                .await
                .unwrap();
            if i == 0 {
                first = resp.token.clone();
            }
            last = resp.token;
        }

        let tokens = state.bearer_tokens.read().await;
        assert_eq!(tokens.len(), 100);
        assert!(!tokens.iter().any(|t| t == &first));
        assert!(tokens.iter().any(|t| t == &last));
    }

    #[tokio::test]
    async fn api_requires_bearer_token_after_pairing() {
        let state = api::tests::test_state(None).await;
        state.bearer_tokens.write().await.push("secret-token".into());
        let app = build_router(state);

        let req = Request::builder()
            .uri("/api/documents")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn api_accepts_valid_bearer_token() {
        let state = api::tests::test_state(None).await;
        state.bearer_tokens.write().await.push("secret-token".into());
        let app = build_router(state);

        let req = Request::builder()
            .uri("/api/documents")
            .header("Authorization", "Bearer secret-token")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
