//! Per-account sliding-window rate limiter (spec §4.1).
//!
//! One mutex guards the timestamp list for all accounts; `check_and_record`
//! holds it across prune+check+append so concurrent callers can never both
//! observe room for the last slot (spec §5, §8 "Rate-limit atomicity").

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Default)]
struct Windows {
    timestamps: HashMap<Uuid, Vec<Instant>>,
}

/// Thread-safe sliding-window rate limiter, shared across the process.
#[derive(Default)]
pub struct RateLimiter {
    inner: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn prune(list: &mut Vec<Instant>, now: Instant) {
        list.retain(|t| now.duration_since(*t) < WINDOW);
    }

    /// Atomically prune, check against `limit`, and record a slot.
    ///
    /// `limit <= 0` disables the limiter (always returns `rejected = false`).
    /// Returns `true` (rejected) without recording a slot if the window is
    /// already full.
    pub async fn check_and_record(&self, account_id: Uuid, limit: i64) -> bool {
        if limit <= 0 {
            return false;
        }
        let limit = limit as usize;
        let now = Instant::now();
        let mut guard = self.inner.lock().await;
        let list = guard.timestamps.entry(account_id).or_default();
        Self::prune(list, now);
        if list.len() >= limit {
            return true;
        }
        list.push(now);
        false
    }

    /// Read-only pre-filter: same pruning and comparison as
    /// `check_and_record`, but never appends a slot.
    pub async fn is_limited(&self, account_id: Uuid, limit: i64) -> bool {
        if limit <= 0 {
            return false;
        }
        let limit = limit as usize;
        let now = Instant::now();
        let mut guard = self.inner.lock().await;
        let list = guard.timestamps.entry(account_id).or_default();
        Self::prune(list, now);
        list.len() >= limit
    }

    /// Drop all recorded state for an account (caller's responsibility on
    /// account deletion, spec §3).
    pub async fn clear(&self, account_id: Uuid) {
        self.inner.lock().await.timestamps.remove(&account_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn disabled_when_limit_non_positive() {
        let limiter = RateLimiter::new();
        let id = Uuid::new_v4();
        for _ in 0..1000 {
            assert!(!limiter.check_and_record(id, 0).await);
        }
    }

    #[tokio::test]
    async fn rejects_once_window_is_full() {
        let limiter = RateLimiter::new();
        let id = Uuid::new_v4();
        for _ in 0..5 {
            assert!(!limiter.check_and_record(id, 5).await);
        }
        assert!(limiter.check_and_record(id, 5).await);
    }

    #[tokio::test]
    async fn is_limited_does_not_consume_a_slot() {
        let limiter = RateLimiter::new();
        let id = Uuid::new_v4();
        for _ in 0..5 {
            assert!(!limiter.is_limited(id, 5).await);
        }
        // is_limited never appended, so a real slot is still available.
        assert!(!limiter.check_and_record(id, 5).await);
    }

    #[tokio::test]
    async fn concurrent_callers_admit_at_most_limit() {
        let limiter = Arc::new(RateLimiter::new());
        let id = Uuid::new_v4();
        let mut handles = Vec::new();
        for _ in 0..100 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                !limiter.check_and_record(id, 10).await
            }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    #[tokio::test]
    async fn clear_resets_state() {
        let limiter = RateLimiter::new();
        let id = Uuid::new_v4();
        for _ in 0..5 {
            limiter.check_and_record(id, 5).await;
        }
        limiter.clear(id).await;
        assert!(!limiter.check_and_record(id, 5).await);
    }
}
