//! OAuth access-token lifecycle for Anthropic accounts (spec §4.8 step 7:
//! "ensure a valid token ... refresh via the refresh-token grant if within 5
//! min of expiry, coalescing concurrent refreshes per account").
//!
//! Only Anthropic's OAuth token endpoint is implemented — it's the only
//! provider family in this proxy that authenticates accounts via OAuth
//! (spec §3 `AuthKind::Oauth`); ChatGPT-subscription accounts carry their
//! own externally-managed access token and never need refreshing here.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::types::SecretMaterial;
use crate::store::{RecordStore, StoreError};

const TOKEN_ENDPOINT: &str = "https://console.anthropic.com/v1/oauth/token";
const ANTHROPIC_CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";
const REFRESH_WINDOW_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Error)]
pub enum OauthError {
    #[error("account {0} not found")]
    AccountMissing(Uuid),
    #[error("account {0} does not use oauth")]
    NotOauth(Uuid),
    #[error("token refresh request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("token endpoint returned an error body")]
    RefreshRejected,
    #[error("store update failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

struct Refreshed {
    access_token: String,
    refresh_token: String,
    expires_at_ms: i64,
}

async fn exchange_refresh_token(client: &reqwest::Client, refresh_token: &str) -> Result<Refreshed, OauthError> {
    let resp = client
        .post(TOKEN_ENDPOINT)
        .json(&serde_json::json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
            "client_id": ANTHROPIC_CLIENT_ID,
        }))
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(OauthError::RefreshRejected);
    }

    let body: RefreshResponse = resp.json().await?;
    Ok(Refreshed {
        access_token: body.access_token,
        refresh_token: body.refresh_token,
        expires_at_ms: Utc::now().timestamp_millis() + body.expires_in * 1000,
    })
}

/// Per-account single-flight token refresh. Shared across the process; one
/// instance covers every Anthropic OAuth account.
#[derive(Default)]
pub struct TokenRefresher {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl TokenRefresher {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, account_id: Uuid) -> Arc<Mutex<()>> {
        let mut guard = self.locks.lock().await;
        guard.entry(account_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Return a valid access token for `account_id`, refreshing it first if
    /// it expires within the next 5 minutes. Concurrent calls for the same
    /// account block on one another and share the single refresh.
    pub async fn ensure_fresh(
        &self,
        client: &reqwest::Client,
        store: &dyn RecordStore,
        account_id: Uuid,
    ) -> Result<String, OauthError> {
        let per_account = self.lock_for(account_id).await;
        let _guard = per_account.lock().await;

        let account = store.get_account(account_id).await.ok_or(OauthError::AccountMissing(account_id))?;
        let SecretMaterial::Oauth {
            access_token,
            refresh_token,
            expires_at_ms,
        } = account.secret
        else {
            return Err(OauthError::NotOauth(account_id));
        };

        if expires_at_ms - Utc::now().timestamp_millis() > REFRESH_WINDOW_MS {
            return Ok(access_token);
        }

        let refreshed = exchange_refresh_token(client, &refresh_token).await?;
        let new_access_token = refreshed.access_token.clone();
        store
            .update_account(
                account_id,
                Box::new(move |a| {
                    a.secret = SecretMaterial::Oauth {
                        access_token: refreshed.access_token,
                        refresh_token: refreshed.refresh_token,
                        expires_at_ms: refreshed.expires_at_ms,
                    };
                }),
            )
            .await?;

        Ok(new_access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::store::types::{Account, AccountStatus, ProviderTag};

    fn oauth_account(id: Uuid, expires_at_ms: i64) -> Account {
        Account {
            id,
            name: "acct".into(),
            provider: ProviderTag::Anthropic,
            secret: SecretMaterial::Oauth {
                access_token: "stale".into(),
                refresh_token: "refresh".into(),
                expires_at_ms,
            },
            base_url: None,
            priority: 0,
            requests_per_minute: 0,
            monthly_budget_usd: None,
            enabled: true,
            external_account_id: None,
            status: AccountStatus::Active,
            last_error: None,
            last_error_at: None,
            consecutive_errors: 0,
        }
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_a_network_call() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        let far_future = Utc::now().timestamp_millis() + 60 * 60 * 1000;
        store.put_account(oauth_account(id, far_future)).await;

        let refresher = TokenRefresher::new();
        let client = reqwest::Client::new();
        let token = refresher.ensure_fresh(&client, &store, id).await.unwrap();
        assert_eq!(token, "stale");
    }

    #[tokio::test]
    async fn non_oauth_account_is_rejected() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        let mut account = oauth_account(id, i64::MAX);
        account.secret = SecretMaterial::ApiKey { key: "k".into() };
        store.put_account(account).await;

        let refresher = TokenRefresher::new();
        let client = reqwest::Client::new();
        let result = refresher.ensure_fresh(&client, &store, id).await;
        assert!(matches!(result, Err(OauthError::NotOauth(_))));
    }
}
