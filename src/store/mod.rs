//! External record-store contract (spec §3, §6.4).
//!
//! The persistent store of accounts/configs/tenants/settings is explicitly
//! out of scope (spec §1): this module only defines the trait boundary
//! (`RecordStore`) and ships one in-memory implementation (`memory::InMemoryStore`)
//! used by default and by tests, following the teacher's pluggable-backend
//! pattern in `api/mission_store/mod.rs` (trait + `memory`/`file`/`sqlite` impls).
//!
//! Monotonic writes: the orchestrator never assumes read-your-write across
//! requests except via the store (spec §6.4).

pub mod memory;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use types::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
}

/// Keyed CRUD over accounts, configs, tenants, and settings, plus append-only
/// logs for usage/request-log/privacy-mapping rows.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_account(&self, id: Uuid) -> Option<Account>;
    async fn list_accounts(&self) -> Vec<Account>;
    async fn put_account(&self, account: Account);
    /// Boxed rather than generic so `RecordStore` stays object-safe behind
    /// `Arc<dyn RecordStore>`.
    async fn update_account(&self, id: Uuid, f: Box<dyn FnOnce(&mut Account) + Send>) -> Result<(), StoreError>;
    async fn delete_account(&self, id: Uuid) -> bool;

    async fn get_config(&self, id: Uuid) -> Option<RoutingConfig>;
    async fn list_configs(&self) -> Vec<RoutingConfig>;
    /// The single globally-active config, if any (spec §3: "at most one globally").
    async fn active_config(&self) -> Option<RoutingConfig>;
    async fn put_config(&self, config: RoutingConfig);

    async fn get_tenant(&self, id: Uuid) -> Option<Tenant>;
    async fn find_tenant_by_key_hash(&self, key_hash: &str) -> Option<Tenant>;
    async fn put_tenant(&self, tenant: Tenant);

    async fn get_setting(&self, key: &str) -> Option<String>;
    async fn put_setting(&self, key: String, value: String);

    async fn append_usage(&self, record: UsageRecord);
    async fn append_request_log(&self, record: RequestLogRecord);
    async fn append_privacy_mapping(&self, record: PrivacyMapping);

    /// Sum of `cost_usd` across usage rows for `account_id` in the current
    /// calendar month (used by the `budget-aware` strategy and the
    /// monthly-budget-cap exclusion in §4.6 step 3).
    async fn monthly_spend_usd(&self, account_id: Uuid) -> f64;
}
