//! Model → ordered candidate list resolution (spec §4.6).

use std::collections::HashMap;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::detect_tier;
use crate::routing::cooldown::{CooldownManager, HasAccountId};
use crate::routing::rate_limiter::RateLimiter;
use crate::store::types::{Account, RoutingConfig, Strategy, Tier, TierAssignment};
use crate::store::RecordStore;

/// One resolved candidate: the account to use, the model to forward as, and
/// whether the orchestrator must convert formats for it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub account: Account,
    pub target_model: Option<String>,
    pub needs_format_conversion: bool,
}

impl HasAccountId for Candidate {
    fn account_id(&self) -> Uuid {
        self.account.id
    }
}

/// Primary + ordered fallbacks, plus the config/tier that produced them
/// (spec §4.6 "Outputs").
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub primary: Candidate,
    pub fallbacks: Vec<Candidate>,
    pub config_id: Option<Uuid>,
    pub tier: Option<Tier>,
}

impl ResolvedRoute {
    /// All candidates, primary first, in the order they should be tried.
    pub fn ordered(&self) -> Vec<Candidate> {
        let mut all = Vec::with_capacity(1 + self.fallbacks.len());
        all.push(self.primary.clone());
        all.extend(self.fallbacks.iter().cloned());
        all
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no enabled account available")]
    NoAccountAvailable,
}

/// Per-(config_id, tier) round-robin counters, incrementing once per
/// resolution (spec §4.6 step 4 "round-robin").
#[derive(Default)]
struct RoundRobinCounters {
    counters: Mutex<HashMap<(Option<Uuid>, Option<Tier>), u64>>,
}

impl RoundRobinCounters {
    async fn next(&self, key: (Option<Uuid>, Option<Tier>)) -> u64 {
        let mut guard = self.counters.lock().await;
        let counter = guard.entry(key).or_insert_with(|| 0);
        let value = *counter;
        *counter = counter.wrapping_add(1);
        value
    }
}

/// Resolves a client-requested model to an ordered candidate list, honoring
/// the active (or tenant-overridden) routing config's strategy.
pub struct RoutingResolver {
    round_robin: RoundRobinCounters,
}

impl Default for RoutingResolver {
    fn default() -> Self {
        Self {
            round_robin: RoundRobinCounters::default(),
        }
    }
}

impl RoutingResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `model` to a route. `tenant_config_id` overrides the globally
    /// active config when present and found (spec §4.6 step 1).
    pub async fn resolve(
        &self,
        store: &dyn RecordStore,
        rate_limiter: &RateLimiter,
        model: &str,
        tenant_config_id: Option<Uuid>,
    ) -> Result<ResolvedRoute, ResolveError> {
        let tier = detect_tier(model);

        let config = match tenant_config_id {
            Some(id) => match store.get_config(id).await {
                Some(c) => Some(c),
                None => store.active_config().await,
            },
            None => store.active_config().await,
        };

        let config = match config {
            Some(c) => c,
            None => return self.fallback_without_config(store).await,
        };

        let assignments: Vec<&TierAssignment> = match tier {
            Some(t) => config.assignments.iter().filter(|a| a.tier == t).collect(),
            None => config.assignments.iter().collect(),
        };

        let mut resolved: Vec<(TierAssignment, Account)> = Vec::new();
        for assignment in assignments {
            let account = match store.get_account(assignment.account_id).await {
                Some(a) if a.enabled => a,
                _ => continue,
            };
            if rate_limiter.is_limited(account.id, account.requests_per_minute as i64).await {
                continue;
            }
            if let Some(budget) = account.monthly_budget_usd {
                if budget > 0.0 {
                    let spent = store.monthly_spend_usd(account.id).await;
                    if spent >= budget {
                        continue;
                    }
                }
            }
            resolved.push((assignment.clone(), account));
        }

        if resolved.is_empty() {
            return Err(ResolveError::NoAccountAvailable);
        }

        let ordered = self.order_by_strategy(store, config.strategy, config.id, tier, resolved).await;

        let mut candidates = ordered.into_iter().map(|(assignment, account)| Candidate {
            needs_format_conversion: !account.provider.is_anthropic_native(),
            target_model: assignment.target_model,
            account,
        });

        let primary = candidates.next().ok_or(ResolveError::NoAccountAvailable)?;
        let fallbacks: Vec<Candidate> = candidates.collect();

        Ok(ResolvedRoute {
            primary,
            fallbacks,
            config_id: Some(config.id),
            tier,
        })
    }

    /// No config at all: pick any enabled Anthropic account, else any
    /// enabled account, with empty fallbacks (spec §4.6 step 1).
    async fn fallback_without_config(&self, store: &dyn RecordStore) -> Result<ResolvedRoute, ResolveError> {
        let accounts = store.list_accounts().await;
        let account = accounts
            .iter()
            .find(|a| a.enabled && a.provider.is_anthropic_native())
            .or_else(|| accounts.iter().find(|a| a.enabled))
            .cloned()
            .ok_or(ResolveError::NoAccountAvailable)?;

        Ok(ResolvedRoute {
            primary: Candidate {
                needs_format_conversion: !account.provider.is_anthropic_native(),
                target_model: None,
                account,
            },
            fallbacks: Vec::new(),
            config_id: None,
            tier: None,
        })
    }

    async fn order_by_strategy(
        &self,
        store: &dyn RecordStore,
        strategy: Strategy,
        config_id: Uuid,
        tier: Option<Tier>,
        mut resolved: Vec<(TierAssignment, Account)>,
    ) -> Vec<(TierAssignment, Account)> {
        match strategy {
            Strategy::Priority => {
                resolved.sort_by(|a, b| b.1.priority.cmp(&a.1.priority));
                resolved
            }
            Strategy::RoundRobin => {
                if resolved.is_empty() {
                    return resolved;
                }
                let offset = self.round_robin.next((Some(config_id), tier)).await as usize;
                let n = resolved.len();
                let rotate_by = offset % n;
                resolved.rotate_left(rotate_by);
                resolved
            }
            Strategy::LeastUsed => {
                let mut with_spend = Vec::with_capacity(resolved.len());
                for (assignment, account) in resolved {
                    let spend = store.monthly_spend_usd(account.id).await;
                    with_spend.push((spend, assignment, account));
                }
                with_spend.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
                with_spend.into_iter().map(|(_, a, acc)| (a, acc)).collect()
            }
            Strategy::BudgetAware => {
                let mut with_headroom = Vec::with_capacity(resolved.len());
                for (assignment, account) in resolved {
                    let spend = store.monthly_spend_usd(account.id).await;
                    let headroom = match account.monthly_budget_usd {
                        Some(budget) => budget - spend,
                        None => f64::INFINITY,
                    };
                    with_headroom.push((headroom, assignment, account));
                }
                with_headroom.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
                with_headroom.into_iter().map(|(_, a, acc)| (a, acc)).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::store::types::{AccountStatus, ProviderTag, SecretMaterial};

    fn account(id: Uuid, provider: ProviderTag, priority: i32, rpm: u32) -> Account {
        Account {
            id,
            name: format!("acct-{id}"),
            provider,
            secret: SecretMaterial::ApiKey { key: "k".into() },
            base_url: None,
            priority,
            requests_per_minute: rpm,
            monthly_budget_usd: None,
            enabled: true,
            external_account_id: None,
            status: AccountStatus::Active,
            last_error: None,
            last_error_at: None,
            consecutive_errors: 0,
        }
    }

    fn assignment(tier: Tier, account_id: Uuid, priority: i32) -> TierAssignment {
        TierAssignment {
            tier,
            account_id,
            priority,
            target_model: None,
        }
    }

    #[tokio::test]
    async fn priority_strategy_orders_descending() {
        let store = InMemoryStore::new();
        let a1 = Uuid::new_v4();
        let a2 = Uuid::new_v4();
        store.put_account(account(a1, ProviderTag::Anthropic, 1, 0)).await;
        store.put_account(account(a2, ProviderTag::Anthropic, 10, 0)).await;
        let config = RoutingConfig {
            id: Uuid::new_v4(),
            name: "default".into(),
            is_active: true,
            strategy: Strategy::Priority,
            assignments: vec![assignment(Tier::Sonnet, a1, 1), assignment(Tier::Sonnet, a2, 10)],
        };
        store.put_config(config).await;

        let resolver = RoutingResolver::new();
        let limiter = RateLimiter::new();
        let route = resolver
            .resolve(&store, &limiter, "claude-sonnet-4-20250514", None)
            .await
            .unwrap();
        assert_eq!(route.primary.account.id, a2);
        assert_eq!(route.fallbacks[0].account.id, a1);
    }

    #[tokio::test]
    async fn no_config_falls_back_to_any_anthropic_account() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        store.put_account(account(id, ProviderTag::Anthropic, 0, 0)).await;
        let resolver = RoutingResolver::new();
        let limiter = RateLimiter::new();
        let route = resolver.resolve(&store, &limiter, "claude-sonnet-4", None).await.unwrap();
        assert_eq!(route.primary.account.id, id);
        assert!(route.fallbacks.is_empty());
        assert!(route.config_id.is_none());
    }

    #[tokio::test]
    async fn excludes_rate_limited_accounts() {
        let store = InMemoryStore::new();
        let a1 = Uuid::new_v4();
        store.put_account(account(a1, ProviderTag::Anthropic, 1, 1)).await;
        let config = RoutingConfig {
            id: Uuid::new_v4(),
            name: "default".into(),
            is_active: true,
            strategy: Strategy::Priority,
            assignments: vec![assignment(Tier::Sonnet, a1, 1)],
        };
        store.put_config(config).await;

        let resolver = RoutingResolver::new();
        let limiter = RateLimiter::new();
        limiter.check_and_record(a1, 1).await;
        let result = resolver.resolve(&store, &limiter, "claude-sonnet-4", None).await;
        assert!(matches!(result, Err(ResolveError::NoAccountAvailable)));
    }

    #[tokio::test]
    async fn round_robin_rotates_across_resolutions() {
        let store = InMemoryStore::new();
        let a1 = Uuid::new_v4();
        let a2 = Uuid::new_v4();
        store.put_account(account(a1, ProviderTag::Anthropic, 1, 0)).await;
        store.put_account(account(a2, ProviderTag::Anthropic, 1, 0)).await;
        let config_id = Uuid::new_v4();
        let config = RoutingConfig {
            id: config_id,
            name: "default".into(),
            is_active: true,
            strategy: Strategy::RoundRobin,
            assignments: vec![assignment(Tier::Sonnet, a1, 1), assignment(Tier::Sonnet, a2, 1)],
        };
        store.put_config(config).await;

        let resolver = RoutingResolver::new();
        let limiter = RateLimiter::new();
        let first = resolver.resolve(&store, &limiter, "claude-sonnet-4", None).await.unwrap();
        let second = resolver.resolve(&store, &limiter, "claude-sonnet-4", None).await.unwrap();
        assert_ne!(first.primary.account.id, second.primary.account.id);
    }
}
