//! In-memory `RecordStore` implementation.
//!
//! This is the only backend shipped in this crate: the persistent store of
//! accounts/configs/tenants/settings is an out-of-scope external
//! collaborator (spec §1). A real deployment plugs a sqlite/postgres-backed
//! implementation in behind the same trait, the way the teacher's
//! `MissionStore` trait is backed by `memory`, `file`, and `sqlite` structs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::*;
use super::{RecordStore, StoreError};

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, Account>,
    configs: HashMap<Uuid, RoutingConfig>,
    tenants: HashMap<Uuid, Tenant>,
    settings: HashMap<String, String>,
    usage: Vec<UsageRecord>,
    request_log: Vec<RequestLogRecord>,
    privacy_mappings: Vec<PrivacyMapping>,
}

/// Thread-safe, process-local `RecordStore`. Nothing here survives restart.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn get_account(&self, id: Uuid) -> Option<Account> {
        self.inner.read().await.accounts.get(&id).cloned()
    }

    async fn list_accounts(&self) -> Vec<Account> {
        self.inner.read().await.accounts.values().cloned().collect()
    }

    async fn put_account(&self, account: Account) {
        self.inner.write().await.accounts.insert(account.id, account);
    }

    async fn update_account(&self, id: Uuid, f: Box<dyn FnOnce(&mut Account) + Send>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let account = inner
            .accounts
            .get_mut(&id)
            .ok_or(StoreError::NotFound("account"))?;
        f(account);
        Ok(())
    }

    async fn delete_account(&self, id: Uuid) -> bool {
        self.inner.write().await.accounts.remove(&id).is_some()
    }

    async fn get_config(&self, id: Uuid) -> Option<RoutingConfig> {
        self.inner.read().await.configs.get(&id).cloned()
    }

    async fn list_configs(&self) -> Vec<RoutingConfig> {
        self.inner.read().await.configs.values().cloned().collect()
    }

    async fn active_config(&self) -> Option<RoutingConfig> {
        self.inner
            .read()
            .await
            .configs
            .values()
            .find(|c| c.is_active)
            .cloned()
    }

    async fn put_config(&self, config: RoutingConfig) {
        self.inner.write().await.configs.insert(config.id, config);
    }

    async fn get_tenant(&self, id: Uuid) -> Option<Tenant> {
        self.inner.read().await.tenants.get(&id).cloned()
    }

    async fn find_tenant_by_key_hash(&self, key_hash: &str) -> Option<Tenant> {
        self.inner
            .read()
            .await
            .tenants
            .values()
            .find(|t| t.key_hash == key_hash)
            .cloned()
    }

    async fn put_tenant(&self, tenant: Tenant) {
        self.inner.write().await.tenants.insert(tenant.id, tenant);
    }

    async fn get_setting(&self, key: &str) -> Option<String> {
        self.inner.read().await.settings.get(key).cloned()
    }

    async fn put_setting(&self, key: String, value: String) {
        self.inner.write().await.settings.insert(key, value);
    }

    async fn append_usage(&self, record: UsageRecord) {
        self.inner.write().await.usage.push(record);
    }

    async fn append_request_log(&self, record: RequestLogRecord) {
        self.inner.write().await.request_log.push(record);
    }

    async fn append_privacy_mapping(&self, record: PrivacyMapping) {
        self.inner.write().await.privacy_mappings.push(record);
    }

    async fn monthly_spend_usd(&self, account_id: Uuid) -> f64 {
        let inner = self.inner.read().await;
        let now = chrono::Utc::now();
        inner
            .usage
            .iter()
            .filter(|u| {
                u.account_id == account_id
                    && u.created_at.year() == now.year()
                    && u.created_at.month() == now.month()
            })
            .map(|u| u.cost_usd)
            .sum()
    }
}

use chrono::Datelike;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::{AccountStatus, AuthKind, ProviderTag, SecretMaterial};

    fn sample_account() -> Account {
        Account {
            id: Uuid::new_v4(),
            name: "acc".into(),
            provider: ProviderTag::Anthropic,
            secret: SecretMaterial::ApiKey {
                key: "sk-test".into(),
            },
            base_url: None,
            priority: 0,
            requests_per_minute: 0,
            monthly_budget_usd: None,
            enabled: true,
            external_account_id: None,
            status: AccountStatus::Unknown,
            last_error: None,
            last_error_at: None,
            consecutive_errors: 0,
        }
    }

    #[tokio::test]
    async fn put_and_get_round_trips() {
        let store = InMemoryStore::new();
        let acc = sample_account();
        let id = acc.id;
        store.put_account(acc).await;
        let fetched = store.get_account(id).await.expect("present");
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.secret.auth_kind(), AuthKind::ApiKey);
    }

    #[tokio::test]
    async fn update_account_mutates_in_place() {
        let store = InMemoryStore::new();
        let acc = sample_account();
        let id = acc.id;
        store.put_account(acc).await;
        store
            .update_account(id, Box::new(|a| a.mark_failure(AccountStatus::Error, "boom")))
            .await
            .unwrap();
        let fetched = store.get_account(id).await.unwrap();
        assert_eq!(fetched.status, AccountStatus::Error);
        assert_eq!(fetched.consecutive_errors, 1);
    }

    #[tokio::test]
    async fn update_missing_account_errors() {
        let store = InMemoryStore::new();
        let err = store.update_account(Uuid::new_v4(), Box::new(|_| {})).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn monthly_spend_sums_current_month_only() {
        let store = InMemoryStore::new();
        let account_id = Uuid::new_v4();
        store
            .append_usage(UsageRecord {
                id: Uuid::new_v4(),
                account_id,
                routing_config_id: None,
                tier: None,
                original_model: "m".into(),
                routed_model: "m".into(),
                input_tokens: 10,
                output_tokens: 10,
                cost_usd: 1.5,
                created_at: chrono::Utc::now(),
            })
            .await;
        assert_eq!(store.monthly_spend_usd(account_id).await, 1.5);
    }
}
