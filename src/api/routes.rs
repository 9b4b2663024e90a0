//! HTTP route wiring and shared application state (spec §6.1).

use std::collections::HashMap;
use std::sync::Arc;

use axum::response::Json;
use axum::routing::{any, get};
use axum::Router;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::guardrail::GuardrailRegistry;
use crate::models::pricing::RateTable;
use crate::models::ModelLimitsTable;
use crate::oauth::TokenRefresher;
use crate::routing::{CooldownManager, FailoverLog, RateLimiter, RoutingResolver};
use crate::store::memory::InMemoryStore;
use crate::store::RecordStore;

use super::admin;
use super::proxy;

/// Shared application state threaded through every handler.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn RecordStore>,
    pub rate_limiter: RateLimiter,
    pub cooldowns: Arc<CooldownManager>,
    pub resolver: RoutingResolver,
    pub guardrail: Option<Arc<GuardrailRegistry>>,
    pub token_refresher: Arc<TokenRefresher>,
    pub http_client: reqwest::Client,
    pub model_limits: ModelLimitsTable,
    pub rate_table: RateTable,
    /// Process-wide `replacement -> original` map, shared across requests so
    /// a later partial extraction of a replacement can still be reversed
    /// (spec §4.3, §5 "Reverse map for guardrails").
    pub reverse_map: Arc<RwLock<HashMap<String, String>>>,
    pub failover_log: Arc<FailoverLog>,
}

/// Start the HTTP server (spec §6.1).
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let guardrail = if config.guardrail_enabled {
        Some(Arc::new(GuardrailRegistry::new(config.guardrail_key)))
    } else {
        None
    };

    let state = Arc::new(AppState {
        store: Arc::new(InMemoryStore::new()),
        rate_limiter: RateLimiter::new(),
        cooldowns: Arc::new(CooldownManager::new()),
        resolver: RoutingResolver::new(),
        guardrail,
        token_refresher: Arc::new(TokenRefresher::new()),
        http_client: reqwest::Client::builder()
            // No global timeout — it applies to the full response body
            // including streaming chunks, which would kill long-running LLM
            // generations (spec §5 "Timeouts").
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default(),
        model_limits: ModelLimitsTable::default(),
        rate_table: RateTable::default(),
        reverse_map: Arc::new(RwLock::new(HashMap::new())),
        failover_log: FailoverLog::new(),
        config: config.clone(),
    });

    let proxy_routes = Router::new()
        .route("/models", get(list_models))
        .route("/*path", any(proxy::handle))
        .layer(axum::extract::DefaultBodyLimit::max(50 * 1024 * 1024));

    let app = Router::new()
        .route("/health", get(health))
        .nest("/v1", proxy_routes)
        .nest("/admin/routing", admin::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
    version: String,
}

/// `GET /health` (spec §6.1).
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /v1/models` — minimal OpenAI-shaped catalog of known Claude ids,
/// unauthenticated (spec §6.1).
async fn list_models() -> Json<serde_json::Value> {
    let ids = [
        "claude-opus-4-20250514",
        "claude-sonnet-4-20250514",
        "claude-haiku-3-5-20241022",
    ];
    Json(serde_json::json!({
        "object": "list",
        "data": ids.iter().map(|id| serde_json::json!({
            "id": id,
            "object": "model",
            "owned_by": "anthropic",
        })).collect::<Vec<_>>(),
    }))
}

// `OPTIONS /v1/*` is answered directly by `CorsLayer::permissive()` with a
// 204, short-circuiting before any route above.
