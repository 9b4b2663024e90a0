//! SSE usage extraction, shared by both forwarders (spec §4.7 "Shared
//! behavior on streaming responses").
//!
//! The upstream body is teed: the orchestrator gets the untouched byte
//! stream back to forward on, while a background scan over the same chunks
//! populates an `Arc<Mutex<UsageSnapshot>>` the caller can read once the
//! stream completes. Scanning per-chunk rather than re-buffering whole SSE
//! lines is the same tradeoff the teacher's `track_stream_health` makes —
//! the usage-bearing event is reliably whole in one chunk in practice.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};

/// Running token/model tally for one upstream call.
#[derive(Debug, Clone, Default)]
pub struct UsageSnapshot {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub model: Option<String>,
}

/// Which provider family's usage field layout to read (spec §4.7
/// per-provider "SSE token extractor" clauses).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageExtractor {
    Anthropic,
    OpenAiCompat,
}

/// Update `snapshot` from one parsed SSE/JSON event body.
pub fn apply_event(extractor: UsageExtractor, value: &Value, snapshot: &mut UsageSnapshot) {
    match extractor {
        UsageExtractor::Anthropic => apply_anthropic_event(value, snapshot),
        UsageExtractor::OpenAiCompat => apply_openai_event(value, snapshot),
    }
}

fn apply_anthropic_event(value: &Value, snapshot: &mut UsageSnapshot) {
    match value.get("type").and_then(Value::as_str) {
        Some("message_start") => {
            let message = value.get("message").cloned().unwrap_or_default();
            if let Some(model) = message.get("model").and_then(Value::as_str) {
                snapshot.model = Some(model.to_string());
            }
            if let Some(usage) = message.get("usage") {
                if let Some(v) = usage.get("input_tokens").and_then(Value::as_u64) {
                    snapshot.input_tokens = v;
                }
                if let Some(v) = usage.get("cache_read_input_tokens").and_then(Value::as_u64) {
                    snapshot.cache_read_input_tokens = v;
                }
                if let Some(v) = usage.get("cache_creation_input_tokens").and_then(Value::as_u64) {
                    snapshot.cache_creation_input_tokens = v;
                }
            }
        }
        Some("message_delta") => {
            if let Some(v) = value.get("usage").and_then(|u| u.get("output_tokens")).and_then(Value::as_u64) {
                snapshot.output_tokens = v;
            }
        }
        _ => {}
    }
}

fn apply_openai_event(value: &Value, snapshot: &mut UsageSnapshot) {
    if let Some(model) = value.get("model").and_then(Value::as_str) {
        snapshot.model = Some(model.to_string());
    }
    if let Some(usage) = value.get("usage") {
        if let Some(v) = usage.get("prompt_tokens").and_then(Value::as_u64) {
            snapshot.input_tokens = v;
        }
        if let Some(v) = usage.get("completion_tokens").and_then(Value::as_u64) {
            snapshot.output_tokens = v;
        }
    }
}

/// Parse every `data: {...}` line in `text` and fold its usage fields into
/// `snapshot`. `[DONE]` and non-JSON lines are ignored.
fn scan_chunk(extractor: UsageExtractor, text: &str, snapshot: &mut UsageSnapshot) {
    for line in text.lines() {
        let Some(json_str) = line.strip_prefix("data: ") else { continue };
        let trimmed = json_str.trim();
        if trimmed.is_empty() || trimmed == "[DONE]" {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            apply_event(extractor, &value, snapshot);
        }
    }
}

/// Fires its `Notify` exactly once, whether the stream it's embedded in runs
/// to completion or is dropped early by a disconnecting client — either way
/// the background scan has stopped advancing and whatever it last saw is
/// final.
struct NotifyOnDrop(Arc<Notify>);

impl Drop for NotifyOnDrop {
    fn drop(&mut self) {
        self.0.notify_one();
    }
}

/// Tee an upstream streaming response: the returned stream yields the exact
/// same bytes for the orchestrator to forward, while `UsageSnapshot` fills in
/// as events pass through. The returned `Notify` fires once the scan has
/// seen everything it ever will (stream end, upstream error, or early
/// client disconnect), so callers can await it instead of guessing how long
/// a stream might run (spec §4.7, §9 "SSE stream plumbing").
pub fn tee(
    upstream: reqwest::Response,
    extractor: UsageExtractor,
) -> (BoxStream<'static, Result<Bytes, std::io::Error>>, Arc<Mutex<UsageSnapshot>>, Arc<Notify>) {
    let snapshot = Arc::new(Mutex::new(UsageSnapshot::default()));
    let snapshot_bg = snapshot.clone();
    let done = Arc::new(Notify::new());
    let done_bg = done.clone();

    let stream = async_stream::stream! {
        let _notify_on_drop = NotifyOnDrop(done_bg);
        let mut inner = std::pin::pin!(upstream.bytes_stream());
        while let Some(item) = inner.next().await {
            match item {
                Ok(chunk) => {
                    if let Ok(text) = std::str::from_utf8(&chunk) {
                        let mut guard = snapshot_bg.lock().await;
                        scan_chunk(extractor, text, &mut guard);
                    }
                    yield Ok(chunk);
                }
                Err(e) => yield Err(std::io::Error::other(e.to_string())),
            }
        }
    };

    (Box::pin(stream), snapshot, done)
}

/// Extract usage directly from a complete, non-streaming response body.
pub fn from_full_body(extractor: UsageExtractor, body: &Value) -> UsageSnapshot {
    let mut snapshot = UsageSnapshot::default();
    match extractor {
        UsageExtractor::Anthropic => {
            if let Some(model) = body.get("model").and_then(Value::as_str) {
                snapshot.model = Some(model.to_string());
            }
            if let Some(usage) = body.get("usage") {
                if let Some(v) = usage.get("input_tokens").and_then(Value::as_u64) {
                    snapshot.input_tokens = v;
                }
                if let Some(v) = usage.get("output_tokens").and_then(Value::as_u64) {
                    snapshot.output_tokens = v;
                }
                if let Some(v) = usage.get("cache_read_input_tokens").and_then(Value::as_u64) {
                    snapshot.cache_read_input_tokens = v;
                }
                if let Some(v) = usage.get("cache_creation_input_tokens").and_then(Value::as_u64) {
                    snapshot.cache_creation_input_tokens = v;
                }
            }
        }
        UsageExtractor::OpenAiCompat => apply_openai_event(body, &mut snapshot),
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn anthropic_message_start_and_delta_accumulate() {
        let mut snapshot = UsageSnapshot::default();
        apply_event(
            UsageExtractor::Anthropic,
            &json!({"type": "message_start", "message": {"model": "claude-sonnet-4", "usage": {"input_tokens": 10, "cache_read_input_tokens": 2}}}),
            &mut snapshot,
        );
        apply_event(
            UsageExtractor::Anthropic,
            &json!({"type": "message_delta", "usage": {"output_tokens": 7}}),
            &mut snapshot,
        );
        assert_eq!(snapshot.input_tokens, 10);
        assert_eq!(snapshot.cache_read_input_tokens, 2);
        assert_eq!(snapshot.output_tokens, 7);
        assert_eq!(snapshot.model.as_deref(), Some("claude-sonnet-4"));
    }

    #[test]
    fn openai_compat_event_reads_usage_and_model() {
        let mut snapshot = UsageSnapshot::default();
        apply_event(
            UsageExtractor::OpenAiCompat,
            &json!({"model": "gpt-4o", "usage": {"prompt_tokens": 5, "completion_tokens": 9}}),
            &mut snapshot,
        );
        assert_eq!(snapshot.input_tokens, 5);
        assert_eq!(snapshot.output_tokens, 9);
        assert_eq!(snapshot.model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn scan_chunk_skips_done_and_non_json_lines() {
        let mut snapshot = UsageSnapshot::default();
        scan_chunk(UsageExtractor::OpenAiCompat, "data: [DONE]\n\nignored\n", &mut snapshot);
        assert_eq!(snapshot.input_tokens, 0);
    }
}
