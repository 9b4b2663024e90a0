//! Inbound proxy-key authentication (spec §4.8 step 1).

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::Config;
use crate::store::types::Tenant;
use crate::store::RecordStore;

/// Who the request authenticated as.
pub enum Authenticated {
    /// Matched the process-wide proxy secret — no tenant scoping.
    ProxySecret,
    /// Matched a stored tenant's key hash.
    Tenant(Tenant),
}

impl Authenticated {
    pub fn tenant_id(&self) -> Option<Uuid> {
        match self {
            Authenticated::ProxySecret => None,
            Authenticated::Tenant(t) => Some(t.id),
        }
    }

    pub fn routing_config_id(&self) -> Option<Uuid> {
        match self {
            Authenticated::ProxySecret => None,
            Authenticated::Tenant(t) => t.routing_config_id,
        }
    }
}

pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for i in 0..a.len() {
        diff |= a[i] ^ b[i];
    }
    diff == 0
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key);
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn key_hash(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(digest)
}

/// Precedence (spec §4.8 step 1): the process-wide proxy secret always wins
/// if it matches; otherwise the key is looked up as a tenant key hash.
pub async fn authenticate(headers: &HeaderMap, config: &Config, store: &dyn RecordStore) -> Option<Authenticated> {
    let token = extract_bearer(headers)?;
    if constant_time_eq(token, &config.proxy_secret) {
        return Some(Authenticated::ProxySecret);
    }
    let hash = key_hash(token);
    store.find_tenant_by_key_hash(&hash).await.map(Authenticated::Tenant)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_rejects_different_lengths_and_content() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
    }
}
