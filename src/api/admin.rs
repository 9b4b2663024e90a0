//! Admin/introspection surface (SPEC_FULL §6.1a), modeled directly on the
//! teacher's `api::model_routing` health/events endpoints but scoped down to
//! this crate's `CooldownManager` + `FailoverLog` instead of a chain store.

use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use uuid::Uuid;

use crate::routing::FailoverEvent;

use super::routes::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(list_health))
        .route("/health/:account_id", get(get_account_health))
        .route("/health/:account_id/clear", post(clear_cooldown))
        .route("/events", get(list_events))
}

#[derive(Debug, Serialize)]
struct AccountHealthSnapshot {
    account_id: Uuid,
    name: String,
    status: crate::store::types::AccountStatus,
    last_error: Option<String>,
    last_error_at: Option<chrono::DateTime<chrono::Utc>>,
    consecutive_errors: u32,
    on_cooldown: bool,
    cooldown_remaining_secs: Option<f64>,
    cooldown_reason: Option<String>,
}

async fn snapshot(state: &AppState, account: crate::store::types::Account) -> AccountHealthSnapshot {
    let on_cooldown = state.cooldowns.is_on_cooldown(account.id).await;
    let cooldown_remaining_secs = state.cooldowns.remaining(account.id).await.map(|d| d.as_secs_f64());
    let cooldown_reason = state.cooldowns.reason(account.id).await;
    AccountHealthSnapshot {
        account_id: account.id,
        name: account.name,
        status: account.status,
        last_error: account.last_error,
        last_error_at: account.last_error_at,
        consecutive_errors: account.consecutive_errors,
        on_cooldown,
        cooldown_remaining_secs,
        cooldown_reason,
    }
}

/// `GET /admin/routing/health` — health + cooldown state for every account.
async fn list_health(State(state): State<Arc<AppState>>) -> Json<Vec<AccountHealthSnapshot>> {
    let accounts = state.store.list_accounts().await;
    let mut out = Vec::with_capacity(accounts.len());
    for account in accounts {
        out.push(snapshot(&state, account).await);
    }
    Json(out)
}

/// `GET /admin/routing/health/:account_id` — health for a single account.
async fn get_account_health(
    State(state): State<Arc<AppState>>,
    AxumPath(account_id): AxumPath<Uuid>,
) -> Result<Json<AccountHealthSnapshot>, (StatusCode, String)> {
    let account = state
        .store
        .get_account(account_id)
        .await
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("account {account_id} not found")))?;
    Ok(Json(snapshot(&state, account).await))
}

/// `POST /admin/routing/health/:account_id/clear` — drop a cooldown early.
async fn clear_cooldown(
    State(state): State<Arc<AppState>>,
    AxumPath(account_id): AxumPath<Uuid>,
) -> Json<serde_json::Value> {
    state.cooldowns.clear(account_id).await;
    Json(serde_json::json!({ "cleared": true }))
}

/// `GET /admin/routing/events` — most recent failover events (bounded ring
/// buffer, see `routing::events::FailoverLog`).
async fn list_events(State(state): State<Arc<AppState>>) -> Json<Vec<FailoverEvent>> {
    Json(state.failover_log.recent(200).await)
}
