//! Data model types for accounts, routing configs, tenants, and the records
//! the orchestrator appends asynchronously (usage, request log, privacy
//! mapping). See spec §3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One of the upstream provider families a stored account can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTag {
    Anthropic,
    Openai,
    OpenaiSub,
    Openrouter,
    Glm,
    Cerebras,
    Deepseek,
    Gemini,
    Minimax,
    Custom,
}

impl ProviderTag {
    /// Whether this provider speaks the Anthropic Messages wire format
    /// natively (the only case where no outbound conversion is needed).
    pub fn is_anthropic_native(&self) -> bool {
        matches!(self, ProviderTag::Anthropic)
    }
}

/// How an account authenticates to its upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    ApiKey,
    Oauth,
}

/// Health status of an account, mutated by the orchestrator on each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Unknown,
    Active,
    Expired,
    Error,
    RateLimited,
}

/// Secret material for an account: either a bare API key, or an OAuth token
/// triple. Invariant (§3): `Oauth` always carries a refresh token and an
/// expiry; enforced by construction, not re-validated at every read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SecretMaterial {
    ApiKey { key: String },
    Oauth {
        access_token: String,
        refresh_token: String,
        /// Absolute expiry, epoch milliseconds.
        expires_at_ms: i64,
    },
}

impl SecretMaterial {
    pub fn auth_kind(&self) -> AuthKind {
        match self {
            SecretMaterial::ApiKey { .. } => AuthKind::ApiKey,
            SecretMaterial::Oauth { .. } => AuthKind::Oauth,
        }
    }

    pub fn access_token(&self) -> &str {
        match self {
            SecretMaterial::ApiKey { key } => key,
            SecretMaterial::Oauth { access_token, .. } => access_token,
        }
    }
}

/// An authenticated upstream identity (spec §3 "Account").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub provider: ProviderTag,
    pub secret: SecretMaterial,
    pub base_url: Option<String>,
    pub priority: i32,
    /// 0 = unlimited.
    pub requests_per_minute: u32,
    /// Optional monthly cost cap, USD.
    pub monthly_budget_usd: Option<f64>,
    pub enabled: bool,
    /// ChatGPT subscription binding.
    pub external_account_id: Option<String>,

    // Health fields, mutated in place by the orchestrator / cooldown manager.
    pub status: AccountStatus,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
}

impl Account {
    pub fn is_rate_limited_by_status(&self) -> bool {
        matches!(self.status, AccountStatus::RateLimited)
    }

    /// Monotonic status transition on a failed attempt (§3 invariant).
    pub fn mark_failure(&mut self, status: AccountStatus, message: impl Into<String>) {
        self.status = status;
        self.last_error = Some(message.into());
        self.last_error_at = Some(Utc::now());
        self.consecutive_errors += 1;
    }

    /// Monotonic status transition on any 2xx (§3 invariant).
    pub fn mark_success(&mut self) {
        self.status = AccountStatus::Active;
        self.consecutive_errors = 0;
    }
}

/// Account-selection strategy for a routing config (spec §3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Priority,
    RoundRobin,
    LeastUsed,
    BudgetAware,
}

/// Coarse capability/price band inferred from a client-requested model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Opus,
    Sonnet,
    Haiku,
}

/// One (tier → account) binding inside a routing config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierAssignment {
    pub tier: Tier,
    pub account_id: Uuid,
    pub priority: i32,
    /// Overrides the client-requested model when forwarding.
    pub target_model: Option<String>,
}

/// A named set of tier assignments (spec §3 "Routing config").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub strategy: Strategy,
    pub assignments: Vec<TierAssignment>,
}

/// A proxy API key holder with its own config override and rate cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    /// sha256 hex digest of the tenant's proxy key, never the raw key.
    pub key_hash: String,
    pub routing_config_id: Option<Uuid>,
    pub requests_per_minute: u32,
}

/// A logged record of an anonymization event — operator visibility only; the
/// reversible mapping lives inside the replacement string itself (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyMapping {
    pub id: Uuid,
    pub category: String,
    pub replacement: String,
    pub created_at: DateTime<Utc>,
}

/// One asynchronous usage accounting row (§4.8 step 10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub routing_config_id: Option<Uuid>,
    pub tier: Option<Tier>,
    pub original_model: String,
    pub routed_model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
}

/// One request-log row. Persistence is out of scope; the shape is recorded
/// here because the orchestrator constructs one per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLogRecord {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub account_id: Option<Uuid>,
    pub status: u16,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}
