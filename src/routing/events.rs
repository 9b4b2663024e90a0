//! Bounded ring buffer of recent failover events (ambient observability,
//! supplemented from the teacher's `provider_health::FallbackEvent` /
//! `ProviderHealthTracker::record_fallback_event` — SPEC_FULL §1.2).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

const MAX_EVENTS: usize = 200;

/// Why a candidate was skipped or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverReason {
    Cooldown,
    RateLimited,
    ServerError,
    Unauthorized,
    Transport,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailoverEvent {
    pub timestamp: DateTime<Utc>,
    pub from_account_id: Uuid,
    pub from_model: String,
    pub reason: FailoverReason,
    pub cooldown_secs: Option<f64>,
    pub attempt_number: u32,
    pub candidate_count: u32,
    pub to_account_id: Option<Uuid>,
}

/// Process-wide ring buffer, newest last, capped at [`MAX_EVENTS`].
#[derive(Default)]
pub struct FailoverLog {
    events: RwLock<Vec<FailoverEvent>>,
}

impl FailoverLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn record(&self, event: FailoverEvent) {
        let mut events = self.events.write().await;
        events.push(event);
        if events.len() > MAX_EVENTS {
            let overflow = events.len() - MAX_EVENTS;
            events.drain(..overflow);
        }
    }

    /// Backfills `to_account_id` on every event still missing it — called
    /// once a candidate loop ends in success.
    pub async fn mark_resolved(&self, started_at: DateTime<Utc>, to_account_id: Uuid) {
        let mut events = self.events.write().await;
        for event in events.iter_mut().rev() {
            if event.timestamp < started_at {
                break;
            }
            if event.to_account_id.is_none() {
                event.to_account_id = Some(to_account_id);
            }
        }
    }

    pub async fn recent(&self, limit: usize) -> Vec<FailoverEvent> {
        let events = self.events.read().await;
        let start = events.len().saturating_sub(limit);
        events[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ring_buffer_caps_at_max_events() {
        let log = FailoverLog::new();
        for _ in 0..(MAX_EVENTS + 10) {
            log.record(FailoverEvent {
                timestamp: Utc::now(),
                from_account_id: Uuid::new_v4(),
                from_model: "m".into(),
                reason: FailoverReason::ServerError,
                cooldown_secs: None,
                attempt_number: 1,
                candidate_count: 2,
                to_account_id: None,
            })
            .await;
        }
        assert_eq!(log.recent(MAX_EVENTS + 10).len(), MAX_EVENTS);
    }

    #[tokio::test]
    async fn mark_resolved_backfills_to_account_id() {
        let log = FailoverLog::new();
        let started_at = Utc::now();
        let failed = Uuid::new_v4();
        let succeeded = Uuid::new_v4();
        log.record(FailoverEvent {
            timestamp: Utc::now(),
            from_account_id: failed,
            from_model: "m".into(),
            reason: FailoverReason::RateLimited,
            cooldown_secs: Some(1.0),
            attempt_number: 1,
            candidate_count: 2,
            to_account_id: None,
        })
        .await;
        log.mark_resolved(started_at, succeeded).await;
        let recent = log.recent(10).await;
        assert_eq!(recent[0].to_account_id, Some(succeeded));
    }
}
