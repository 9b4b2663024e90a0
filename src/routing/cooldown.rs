//! Per-account adaptive cooldown manager (spec §4.2).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use uuid::Uuid;

const BASE_SECS: f64 = 15.0;
const CAP_SECS: f64 = 300.0;
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Clone)]
struct Entry {
    until: Instant,
    reason: String,
    consecutive_failures: u32,
}

/// Tracks per-account cooldown windows with exponential backoff.
#[derive(Default)]
pub struct CooldownManager {
    entries: RwLock<HashMap<Uuid, Entry>>,
}

/// A candidate as seen by `sort_by_cooldown`: anything with an account id.
pub trait HasAccountId {
    fn account_id(&self) -> Uuid;
}

impl CooldownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// `15 * 2^(n-1)` seconds, capped at 300s, for `n >= 1` consecutive
    /// failures.
    fn backoff_secs(n: u32) -> f64 {
        debug_assert!(n >= 1);
        (BASE_SECS * 2f64.powi(n as i32 - 1)).min(CAP_SECS)
    }

    /// Put `account_id` on cooldown, incrementing its consecutive-failure
    /// count and computing the duration per spec §4.2:
    /// `retry_after_secs` if positive, else `min(15·2^(N-1), 300)`.
    pub async fn set(&self, account_id: Uuid, reason: impl Into<String>, retry_after_secs: Option<f64>) -> Duration {
        let reason = reason.into();
        let mut entries = self.entries.write().await;
        let n = entries
            .get(&account_id)
            .map(|e| e.consecutive_failures)
            .unwrap_or(0)
            + 1;
        let secs = match retry_after_secs {
            Some(s) if s > 0.0 => s,
            _ => Self::backoff_secs(n),
        };
        let duration = Duration::from_secs_f64(secs);
        let until = Instant::now() + duration;
        tracing::info!(
            account_id = %account_id,
            reason = %reason,
            duration_secs = secs,
            consecutive_failures = n,
            "account placed on cooldown"
        );
        entries.insert(
            account_id,
            Entry {
                until,
                reason,
                consecutive_failures: n,
            },
        );
        duration
    }

    /// Lazily prunes the entry if expired, then reports cooldown status.
    pub async fn is_on_cooldown(&self, account_id: Uuid) -> bool {
        let now = Instant::now();
        let expired = {
            let entries = self.entries.read().await;
            match entries.get(&account_id) {
                Some(e) => e.until <= now,
                None => return false,
            }
        };
        if expired {
            self.entries.write().await.remove(&account_id);
            false
        } else {
            true
        }
    }

    /// Remaining cooldown duration, if still active.
    pub async fn remaining(&self, account_id: Uuid) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.get(&account_id).and_then(|e| {
            if e.until > now {
                Some(e.until - now)
            } else {
                None
            }
        })
    }

    pub async fn reason(&self, account_id: Uuid) -> Option<String> {
        self.entries.read().await.get(&account_id).map(|e| e.reason.clone())
    }

    /// Drop the cooldown entry and reset the consecutive-failure counter.
    pub async fn clear(&self, account_id: Uuid) {
        tracing::debug!(account_id = %account_id, "cooldown cleared");
        self.entries.write().await.remove(&account_id);
    }

    /// Stably reorder `candidates`: non-cooled-down entries keep their
    /// original relative order first, then cooled-down ones ordered by
    /// ascending expiry.
    ///
    /// Snapshots `now` once up front and treats `until <= now` as
    /// not-cooled-down for every element, so an entry that happens to expire
    /// mid-sort can't be classified inconsistently (spec §9 Open Question).
    pub async fn sort_by_cooldown<T: HasAccountId>(&self, candidates: Vec<T>) -> Vec<T> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let until_of = |id: Uuid| -> Option<Instant> {
            entries.get(&id).and_then(|e| if e.until > now { Some(e.until) } else { None })
        };

        let mut healthy = Vec::new();
        let mut cooled = Vec::new();
        for c in candidates {
            match until_of(c.account_id()) {
                Some(until) => cooled.push((until, c)),
                None => healthy.push(c),
            }
        }
        cooled.sort_by_key(|(until, _)| *until);
        healthy.extend(cooled.into_iter().map(|(_, c)| c));
        healthy
    }
}

/// Parse a `Retry-After` header value: integer seconds, or an HTTP-date.
/// Returns the default (60s) on unparseable input (spec §4.2).
pub fn parse_retry_after(header: &str) -> Duration {
    let header = header.trim();
    if let Ok(secs) = header.parse::<f64>() {
        if secs >= 0.0 {
            return Duration::from_secs_f64(secs);
        }
    }
    if let Ok(date) = httpdate_parse(header) {
        let now = std::time::SystemTime::now();
        if let Ok(delta) = date.duration_since(now) {
            return delta;
        }
        return Duration::from_secs(0);
    }
    Duration::from_secs(DEFAULT_RETRY_AFTER_SECS)
}

/// Minimal RFC 7231 `HTTP-date` parser (`Sun, 06 Nov 1994 08:49:37 GMT`).
/// Implemented locally to avoid pulling in a dedicated date-parsing crate
/// for a single header format; falls through to the default on any
/// malformed input.
fn httpdate_parse(s: &str) -> Result<std::time::SystemTime, ()> {
    // Expected form: "<day-name>, DD <mon> YYYY HH:MM:SS GMT"
    let parts: Vec<&str> = s.split_whitespace().collect();
    if parts.len() != 6 || parts[5] != "GMT" {
        return Err(());
    }
    let day: u32 = parts[1].parse().map_err(|_| ())?;
    let month = match parts[2] {
        "Jan" => 1,
        "Feb" => 2,
        "Mar" => 3,
        "Apr" => 4,
        "May" => 5,
        "Jun" => 6,
        "Jul" => 7,
        "Aug" => 8,
        "Sep" => 9,
        "Oct" => 10,
        "Nov" => 11,
        "Dec" => 12,
        _ => return Err(()),
    };
    let year: i64 = parts[3].parse().map_err(|_| ())?;
    let time_parts: Vec<&str> = parts[4].split(':').collect();
    if time_parts.len() != 3 {
        return Err(());
    }
    let hour: i64 = time_parts[0].parse().map_err(|_| ())?;
    let min: i64 = time_parts[1].parse().map_err(|_| ())?;
    let sec: i64 = time_parts[2].parse().map_err(|_| ())?;

    let dt = chrono::NaiveDate::from_ymd_opt(year as i32, month, day)
        .ok_or(())?
        .and_hms_opt(hour as u32, min as u32, sec as u32)
        .ok_or(())?;
    let epoch = dt.and_utc().timestamp();
    if epoch < 0 {
        return Err(());
    }
    Ok(std::time::UNIX_EPOCH + Duration::from_secs(epoch as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Cand(Uuid);
    impl HasAccountId for Cand {
        fn account_id(&self) -> Uuid {
            self.0
        }
    }

    #[tokio::test]
    async fn backoff_grows_exponentially_and_caps_at_300() {
        let mgr = CooldownManager::new();
        let id = Uuid::new_v4();
        let d1 = mgr.set(id, "err", None).await;
        assert_eq!(d1.as_secs_f64(), 15.0);
        mgr.clear(id).await; // reset isn't what we want here; re-derive manually
        // Drive failures sequentially without clearing to observe growth.
        let id2 = Uuid::new_v4();
        let mut durations = Vec::new();
        for _ in 0..10 {
            durations.push(mgr.set(id2, "err", None).await.as_secs_f64());
        }
        assert_eq!(durations[0], 15.0);
        assert_eq!(durations[1], 30.0);
        assert_eq!(durations[2], 60.0);
        assert_eq!(durations[3], 120.0);
        assert_eq!(durations[4], 240.0);
        assert_eq!(durations[5], 300.0); // capped
        assert_eq!(durations[9], 300.0);
    }

    #[tokio::test]
    async fn retry_after_overrides_backoff() {
        let mgr = CooldownManager::new();
        let id = Uuid::new_v4();
        let d = mgr.set(id, "rate_limit", Some(30.0)).await;
        assert_eq!(d.as_secs_f64(), 30.0);
    }

    #[tokio::test]
    async fn clear_resets_consecutive_failures() {
        let mgr = CooldownManager::new();
        let id = Uuid::new_v4();
        mgr.set(id, "err", None).await;
        mgr.set(id, "err", None).await;
        mgr.clear(id).await;
        let d = mgr.set(id, "err", None).await;
        assert_eq!(d.as_secs_f64(), 15.0);
    }

    #[tokio::test]
    async fn sort_by_cooldown_orders_healthy_first_then_ascending_expiry() {
        let mgr = CooldownManager::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        // b gets a long cooldown, c a short one, a stays healthy.
        mgr.set(b, "err", Some(100.0)).await;
        mgr.set(c, "err", Some(10.0)).await;
        let sorted = mgr.sort_by_cooldown(vec![Cand(b), Cand(a), Cand(c)]).await;
        let ids: Vec<Uuid> = sorted.iter().map(|c| c.0).collect();
        assert_eq!(ids, vec![a, c, b]);
    }

    #[test]
    fn parse_retry_after_numeric() {
        assert_eq!(parse_retry_after("30").as_secs(), 30);
    }

    #[test]
    fn parse_retry_after_unparseable_defaults_to_60() {
        assert_eq!(parse_retry_after("not-a-duration").as_secs(), 60);
    }
}
