//! Proxy orchestrator (spec §4.8): the twelve-step request path shared by
//! every inbound wire format. Mirrors the density and tone of the teacher's
//! `chat_completions` handler (candidate tried, cooldown hit, failover
//! taken, success all logged at `debug`/`info`/`warn`).

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde_json::Value;

use crate::convert::{
    self, anthropic_response_to_openai, openai_response_to_anthropic, AnthropicToOpenAiSse, ConvertError,
    OpenAiToAnthropicSse,
};
use crate::guardrail::{traversal, StreamDeanonymizer};
use crate::routing::cooldown::parse_retry_after;
use crate::routing::{FailoverEvent, FailoverReason};
use crate::store::types::{Account, AccountStatus, ProviderTag, UsageRecord};
use crate::store::RecordStore;

use super::auth::{authenticate, Authenticated};
use super::error::{error_response, ErrorKind, InboundFormat};
use super::routes::AppState;

const TEXT_EVENT_STREAM: &str = "text/event-stream";
const NO_CACHE: &str = "no-cache";

/// Entry point for `ALL /v1/*`. Handles both `/v1/messages` (Anthropic) and
/// `/v1/chat/completions` (OpenAI) shapes; the inbound format is detected
/// purely from the path (spec §4.8 step 2).
pub async fn handle(State(state): State<Arc<AppState>>, req: axum::extract::Request) -> Response {
    let path = req.uri().path().to_string();
    let format = InboundFormat::detect(&path);
    let headers = req.headers().clone();

    // Step 1: auth.
    let authed = match authenticate(&headers, &state.config, state.store.as_ref()).await {
        Some(a) => a,
        None => return error_response(format, ErrorKind::AuthFailed, "invalid API key"),
    };

    let body_bytes = match axum::body::to_bytes(req.into_body(), 50 * 1024 * 1024).await {
        Ok(b) => b,
        Err(e) => return error_response(format, ErrorKind::ClientInvalid, format!("failed to read body: {e}")),
    };

    // Step 3: parse body.
    let mut body: Value = match serde_json::from_slice(&body_bytes) {
        Ok(v) => v,
        Err(e) => return error_response(format, ErrorKind::ClientInvalid, format!("malformed JSON: {e}")),
    };

    let requested_model = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(&state.config.default_model)
        .to_string();
    let client_stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    // Step 4: normalize to Anthropic shape.
    if format == InboundFormat::OpenAi {
        body = match convert::openai_request_to_anthropic(&body) {
            Ok(v) => v,
            Err(e) => return error_response(format, ErrorKind::ClientInvalid, e.to_string()),
        };
        body["model"] = Value::String(requested_model.clone());
    }

    // Step 5: guardrails.
    let mut anonymized_count = 0usize;
    if state.config.guardrail_enabled {
        if let Some(registry) = &state.guardrail {
            let mut reverse_map = state.reverse_map.write().await;
            anonymized_count = traversal::anonymize_body(registry, &mut body, &mut reverse_map);
        }
    }
    tracing::debug!(anonymized_count, "guardrail pass complete");

    // Step 6: resolve route.
    let route = match state
        .resolver
        .resolve(
            state.store.as_ref(),
            &state.rate_limiter,
            &requested_model,
            authed.routing_config_id(),
        )
        .await
    {
        Ok(r) => r,
        Err(_) => return error_response(format, ErrorKind::NoCandidate, "no account available for this model"),
    };
    let candidates = state.cooldowns.sort_by_cooldown(route.ordered()).await;
    let candidate_count = candidates.len() as u32;

    let request_started_at = chrono::Utc::now();
    let mut attempted_401_retry = false;
    let mut idx = 0usize;

    while idx < candidates.len() {
        let candidate = &candidates[idx];
        let account = &candidate.account;
        let is_last = idx == candidates.len() - 1;

        if !is_last && state.cooldowns.is_on_cooldown(account.id).await {
            tracing::debug!(account_id = %account.id, "skipping cooled-down candidate");
            idx += 1;
            continue;
        }

        let rejected = state
            .rate_limiter
            .check_and_record(account.id, account.requests_per_minute as i64)
            .await;
        if rejected {
            if is_last {
                return error_response(format, ErrorKind::RateLimited, "rate limit exceeded");
            }
            tracing::debug!(account_id = %account.id, "rate limit exhausted, trying next candidate");
            idx += 1;
            continue;
        }

        let api_key = match resolve_api_key(&state, account).await {
            Ok(k) => k,
            Err(e) => {
                tracing::warn!(account_id = %account.id, error = %e, "token refresh failed");
                if is_last {
                    return error_response(format, ErrorKind::AuthFailed, "oauth token refresh failed");
                }
                idx += 1;
                continue;
            }
        };

        let target_model = candidate.target_model.clone().unwrap_or_else(|| requested_model.clone());
        let mut outbound_body = body.clone();
        outbound_body["model"] = Value::String(target_model.clone());

        let outbound_body = if candidate.needs_format_conversion {
            match convert::anthropic_request_to_openai(&outbound_body, &target_model) {
                Ok(v) => v,
                Err(e) => return error_response(format, ErrorKind::ClientInvalid, e.to_string()),
            }
        } else {
            if let Some(max_tokens) = outbound_body.get("max_tokens").and_then(Value::as_u64) {
                let clamped = state.model_limits.clamp_max_tokens(max_tokens as u32, &target_model);
                outbound_body["max_tokens"] = Value::from(clamped);
            }
            outbound_body
        };

        let outbound_path = if candidate.needs_format_conversion {
            "/v1/chat/completions"
        } else {
            "/v1/messages"
        };
        let forward_req = crate::providers::ForwardRequest {
            path: outbound_path.to_string(),
            method: Method::POST,
            headers: headers.clone(),
            body: serde_json::to_vec(&outbound_body).unwrap_or_default().into(),
            api_key,
            base_url: account.base_url.clone(),
            auth_type: account.secret.auth_kind(),
            external_account_id: account.external_account_id.clone(),
        };

        let attempt_start = Instant::now();
        let forwarded = if account.provider.is_anthropic_native() {
            crate::providers::anthropic::forward(&state.http_client, &forward_req).await
        } else {
            crate::providers::openai_compat::forward(&state.http_client, account.provider, &forward_req).await
        };

        let resp = match forwarded {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(account_id = %account.id, error = %e, "upstream transport failure");
                state.cooldowns.set(account.id, "transport_error", None).await;
                record_failover(&state, account.id, &requested_model, FailoverReason::Transport, None, idx, candidate_count)
                    .await;
                let _ = state
                    .store
                    .update_account(account.id, Box::new(|a| a.mark_failure(AccountStatus::Error, e.to_string())))
                    .await;
                if is_last {
                    return error_response(format, ErrorKind::Exhausted, "all candidates exhausted");
                }
                idx += 1;
                continue;
            }
        };

        // Step 9: error handling.
        if resp.status == 429 {
            let retry_after = resp
                .headers
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(parse_retry_after);
            let cooldown = state
                .cooldowns
                .set(account.id, "rate_limited", retry_after.map(|d| d.as_secs_f64()))
                .await;
            let _ = state
                .store
                .update_account(account.id, Box::new(|a| a.mark_failure(AccountStatus::RateLimited, "429 from upstream")))
                .await;
            record_failover(
                &state,
                account.id,
                &requested_model,
                FailoverReason::RateLimited,
                Some(cooldown.as_secs_f64()),
                idx,
                candidate_count,
            )
            .await;
            if state.config.auto_switch_on_rate_limit && !is_last {
                idx += 1;
                continue;
            }
            return error_response(format, ErrorKind::RateLimited, "upstream rate limited");
        }

        if resp.status >= 500 {
            let cooldown = state.cooldowns.set(account.id, "server_error", None).await;
            let _ = state
                .store
                .update_account(account.id, Box::new(|a| a.mark_failure(AccountStatus::Error, format!("{} from upstream", resp.status))))
                .await;
            record_failover(
                &state,
                account.id,
                &requested_model,
                FailoverReason::ServerError,
                Some(cooldown.as_secs_f64()),
                idx,
                candidate_count,
            )
            .await;
            if state.config.auto_switch_on_error && !is_last {
                idx += 1;
                continue;
            }
            return error_response(format, ErrorKind::Exhausted, "upstream server error");
        }

        if resp.status == 401
            && account.provider == ProviderTag::Anthropic
            && account.secret.auth_kind() == crate::store::types::AuthKind::Oauth
            && !attempted_401_retry
        {
            attempted_401_retry = true;
            tracing::warn!(account_id = %account.id, "401 from anthropic oauth account, retrying once");
            let _ = state
                .store
                .update_account(
                    account.id,
                    Box::new(|a| {
                        if let crate::store::types::SecretMaterial::Oauth { expires_at_ms, .. } = &mut a.secret {
                            *expires_at_ms = 0;
                        }
                    }),
                )
                .await;
            record_failover(&state, account.id, &requested_model, FailoverReason::Unauthorized, None, idx, candidate_count)
                .await;
            continue; // retry same idx
        }

        if !(200..300).contains(&resp.status) {
            let _ = state
                .store
                .update_account(account.id, Box::new(|a| a.mark_failure(AccountStatus::Error, format!("{} from upstream", resp.status))))
                .await;
            if is_last {
                return error_response(format, ErrorKind::Exhausted, "upstream returned an error");
            }
            idx += 1;
            continue;
        }

        // Step 10: success.
        state.cooldowns.clear(account.id).await;
        let _ = state.store.update_account(account.id, Box::new(|a| a.mark_success())).await;
        state.failover_log.mark_resolved(request_started_at, account.id).await;

        record_usage(&state, &route, account, &requested_model, &target_model, resp.usage.clone(), resp.usage_done.clone());

        let latency_ms = attempt_start.elapsed().as_millis() as u64;
        tracing::info!(account_id = %account.id, provider = ?account.provider, latency_ms, "request succeeded");

        return build_response(&state, format, candidate.needs_format_conversion, client_stream, account, resp).await;
    }

    error_response(format, ErrorKind::Exhausted, "all candidates exhausted")
}

async fn resolve_api_key(state: &AppState, account: &Account) -> Result<String, crate::oauth::OauthError> {
    match account.secret.auth_kind() {
        crate::store::types::AuthKind::ApiKey => Ok(account.secret.access_token().to_string()),
        crate::store::types::AuthKind::Oauth => {
            state.token_refresher.ensure_fresh(&state.http_client, state.store.as_ref(), account.id).await
        }
    }
}

async fn record_failover(
    state: &AppState,
    account_id: uuid::Uuid,
    model: &str,
    reason: FailoverReason,
    cooldown_secs: Option<f64>,
    idx: usize,
    candidate_count: u32,
) {
    state
        .failover_log
        .record(FailoverEvent {
            timestamp: chrono::Utc::now(),
            from_account_id: account_id,
            from_model: model.to_string(),
            reason,
            cooldown_secs,
            attempt_number: (idx + 1) as u32,
            candidate_count,
            to_account_id: None,
        })
        .await;
}

/// Fire-and-forget usage accounting (spec §4.8 step 10, §5 "MUST not block
/// the response"). Waits on `usage_done` rather than guessing a delay: for a
/// non-streaming response it resolves immediately, for a streaming one it
/// resolves once the background tee has seen the stream's terminating event
/// (or an early disconnect), so `usage` is read only once it's final.
fn record_usage(
    state: &Arc<AppState>,
    route: &crate::routing::ResolvedRoute,
    account: &Account,
    original_model: &str,
    routed_model: &str,
    usage: Arc<tokio::sync::Mutex<crate::providers::UsageSnapshot>>,
    usage_done: Arc<tokio::sync::Notify>,
) {
    let store = Arc::clone(&state.store);
    let rate_table = state.rate_table.clone();
    let account_id = account.id;
    let config_id = route.config_id;
    let tier = route.tier;
    let original_model = original_model.to_string();
    let routed_model = routed_model.to_string();
    tokio::spawn(async move {
        usage_done.notified().await;
        let snapshot = usage.lock().await.clone();
        let cost_usd = rate_table.cost_usd(&routed_model, snapshot.input_tokens, snapshot.output_tokens);
        store
            .append_usage(UsageRecord {
                id: uuid::Uuid::new_v4(),
                account_id,
                routing_config_id: config_id,
                tier,
                original_model,
                routed_model,
                input_tokens: snapshot.input_tokens,
                output_tokens: snapshot.output_tokens,
                cost_usd,
                created_at: chrono::Utc::now(),
            })
            .await;
    });
}

/// Step 11: response body conversion and final header assembly.
async fn build_response(
    state: &Arc<AppState>,
    format: InboundFormat,
    needs_format_conversion: bool,
    client_stream: bool,
    account: &Account,
    resp: crate::providers::ForwardResponse,
) -> Response {
    let guardrail_on = state.config.guardrail_enabled && state.guardrail.is_some();
    let proxy_account = account.name.clone();
    let proxy_strategy = if needs_format_conversion { "config+failover" } else { "direct" };

    match resp.body {
        crate::providers::ForwardBody::Stream(upstream) => {
            let registry = state.guardrail.clone();
            let reverse_map = Arc::clone(&state.reverse_map);
            // Upstream's native shape is OpenAI iff the outbound request needed
            // conversion (the account isn't Anthropic-native); conversion back
            // to the client is only needed when that differs from `format`.
            let openai_to_anthropic = needs_format_conversion && format == InboundFormat::Anthropic;
            let anthropic_to_openai = !needs_format_conversion && format == InboundFormat::OpenAi;

            let stream = build_sse_pipeline(upstream, openai_to_anthropic, anthropic_to_openai, guardrail_on, registry, reverse_map);

            let mut builder = Response::builder()
                .status(StatusCode::OK)
                .header(axum::http::header::CONTENT_TYPE, TEXT_EVENT_STREAM)
                .header(axum::http::header::CACHE_CONTROL, NO_CACHE)
                .header("X-Proxy-Account", HeaderValue::from_str(&proxy_account).unwrap_or_else(|_| HeaderValue::from_static("unknown")))
                .header("X-Proxy-Strategy", proxy_strategy)
                .header(
                    axum::http::header::ACCESS_CONTROL_EXPOSE_HEADERS,
                    "X-Proxy-Account, X-Proxy-Strategy",
                );
            builder = builder.header(
                axum::http::header::CONTENT_TYPE,
                if client_stream { TEXT_EVENT_STREAM } else { TEXT_EVENT_STREAM },
            );
            builder.body(Body::from_stream(stream)).unwrap_or_else(|_| {
                (StatusCode::INTERNAL_SERVER_ERROR, "failed to build response").into_response()
            })
        }
        crate::providers::ForwardBody::Full(bytes) => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            let converted = match convert_full_body(&text, needs_format_conversion, format) {
                Ok(v) => v,
                Err(e) => return error_response(format, ErrorKind::ClientInvalid, e.to_string()),
            };
            let final_text = if guardrail_on {
                let registry = state.guardrail.as_ref().unwrap();
                let reverse_map = state.reverse_map.read().await;
                deanonymize_json_strings(registry, &converted, &reverse_map)
            } else {
                converted
            };

            Response::builder()
                .status(StatusCode::OK)
                .header(axum::http::header::CONTENT_TYPE, "application/json")
                .header("X-Proxy-Account", HeaderValue::from_str(&proxy_account).unwrap_or_else(|_| HeaderValue::from_static("unknown")))
                .header("X-Proxy-Strategy", proxy_strategy)
                .header(
                    axum::http::header::ACCESS_CONTROL_EXPOSE_HEADERS,
                    "X-Proxy-Account, X-Proxy-Strategy",
                )
                .body(Body::from(final_text))
                .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "failed to build response").into_response())
        }
    }
}

/// Upstream's native shape is OpenAI iff `needs_format_conversion` (the
/// outbound request needed conversion because the account isn't
/// Anthropic-native); convert back to the client's `inbound` format only
/// when that differs from upstream's native shape (spec §4.8 step 11).
fn convert_full_body(text: &str, needs_format_conversion: bool, inbound: InboundFormat) -> Result<String, ConvertError> {
    let upstream_is_openai = needs_format_conversion;
    let needs_reconversion = match inbound {
        InboundFormat::Anthropic => upstream_is_openai,
        InboundFormat::OpenAi => !upstream_is_openai,
    };
    if !needs_reconversion {
        return Ok(text.to_string());
    }
    let value: Value = serde_json::from_str(text).map_err(|_| ConvertError::Malformed("non-JSON upstream body"))?;
    let model = value.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
    let converted = match inbound {
        InboundFormat::Anthropic => openai_response_to_anthropic(&value, &model)?,
        InboundFormat::OpenAi => anthropic_response_to_openai(&value, &model)?,
    };
    Ok(converted.to_string())
}

fn deanonymize_json_strings(
    registry: &crate::guardrail::GuardrailRegistry,
    text: &str,
    reverse_map: &std::collections::HashMap<String, String>,
) -> String {
    match serde_json::from_str::<Value>(text) {
        Ok(mut value) => {
            deanonymize_value(registry, &mut value, reverse_map);
            value.to_string()
        }
        Err(_) => registry.deanonymize(text, reverse_map),
    }
}

fn deanonymize_value(registry: &crate::guardrail::GuardrailRegistry, value: &mut Value, reverse_map: &std::collections::HashMap<String, String>) {
    match value {
        Value::String(s) => *s = registry.deanonymize(s, reverse_map),
        Value::Array(items) => items.iter_mut().for_each(|v| deanonymize_value(registry, v, reverse_map)),
        Value::Object(map) => map.values_mut().for_each(|v| deanonymize_value(registry, v, reverse_map)),
        _ => {}
    }
}

/// Build the upstream-byte-stream -> client-byte-stream pipeline: SSE
/// format conversion (if formats differ) followed by deanonymization (if
/// guardrails are on), per spec §4.8 step 11.
fn build_sse_pipeline(
    upstream: futures::stream::BoxStream<'static, Result<bytes::Bytes, std::io::Error>>,
    openai_to_anthropic: bool,
    anthropic_to_openai: bool,
    guardrail_on: bool,
    registry: Option<Arc<crate::guardrail::GuardrailRegistry>>,
    reverse_map: Arc<tokio::sync::RwLock<std::collections::HashMap<String, String>>>,
) -> impl futures::Stream<Item = Result<bytes::Bytes, std::io::Error>> {
    async_stream::stream! {
        let mut sse_to_anthropic = OpenAiToAnthropicSse::default();
        let mut sse_to_openai = AnthropicToOpenAiSse::default();
        let mut byte_buf = String::new();
        let mut upstream = upstream;
        let mut deanonymizer = registry.as_ref().map(|r| StreamDeanonymizer::new(r));

        while let Some(chunk) = upstream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(e);
                    continue;
                }
            };
            byte_buf.push_str(&String::from_utf8_lossy(&chunk));

            let mut out_lines: Vec<String> = Vec::new();
            while let Some(pos) = byte_buf.find("\n\n") {
                let event_block: String = byte_buf.drain(..pos + 2).collect();
                if openai_to_anthropic {
                    if let Some(data) = extract_data_line(&event_block) {
                        if data == "[DONE]" {
                            out_lines.extend(sse_to_anthropic.finish());
                        } else if let Ok(value) = serde_json::from_str::<Value>(&data) {
                            out_lines.extend(sse_to_anthropic.push(&value));
                        }
                    }
                } else if anthropic_to_openai {
                    if let Some((event_name, data)) = extract_event_and_data(&event_block) {
                        if let Ok(value) = serde_json::from_str::<Value>(&data) {
                            out_lines.extend(sse_to_openai.push(&event_name, &value));
                        }
                    }
                } else {
                    out_lines.push(event_block);
                }
            }

            if !out_lines.is_empty() {
                let joined = if guardrail_on {
                    if let Some(deanonymizer) = &mut deanonymizer {
                        deanonymize_sse_text(deanonymizer, &reverse_map, &out_lines).await
                    } else {
                        out_lines.concat()
                    }
                } else {
                    out_lines.concat()
                };
                yield Ok(bytes::Bytes::from(joined));
            }
        }
    }
}

/// Run deanonymization over each `data:` payload's text-bearing deltas,
/// reusing the caller's `StreamDeanonymizer` for the life of the stream. A
/// token withheld at a non-safe flush point is state the deanonymizer
/// carries into the next call, not something resolved within one call — the
/// line reassembly above only resolves SSE *framing* fragmentation, not
/// anonymized-token fragmentation across events.
async fn deanonymize_sse_text(
    deanonymizer: &mut StreamDeanonymizer<'_>,
    reverse_map: &Arc<tokio::sync::RwLock<std::collections::HashMap<String, String>>>,
    lines: &[String],
) -> String {
    let map = reverse_map.read().await;
    let mut out = String::new();
    for line in lines {
        if let Some(data) = extract_data_line(line) {
            if data == "[DONE]" {
                out.push_str(&deanonymizer.flush_all(&map));
                out.push_str(line);
                continue;
            }
            if let Ok(mut value) = serde_json::from_str::<Value>(&data) {
                let block_index = value.get("index").and_then(Value::as_u64).unwrap_or(0);
                let mut changed = false;
                if let Some(text) = text_delta_mut(&mut value) {
                    *text = deanonymizer.push(block_index, text, &map);
                    changed = true;
                }
                if changed {
                    out.push_str(&rebuild_event(line, &value));
                    continue;
                }
            }
        }
        out.push_str(line);
    }
    out
}

/// Locate the text-bearing field inside a `content_block_delta` (`text`)
/// and mutate it in place; other delta kinds (`input_json_delta`, OpenAI
/// tool-call argument deltas) carry no plain sensitive text and pass
/// through untouched.
fn text_delta_mut(value: &mut Value) -> Option<&mut String> {
    match value.get_mut("delta")?.get_mut("text")? {
        Value::String(s) => Some(s),
        _ => None,
    }
}

fn rebuild_event(original_line: &str, value: &Value) -> String {
    if let Some(event_name) = original_line.strip_prefix("event: ").and_then(|rest| rest.split('\n').next()) {
        format!("event: {event_name}\ndata: {value}\n\n")
    } else {
        format!("data: {value}\n\n")
    }
}

fn extract_data_line(event_block: &str) -> Option<String> {
    event_block
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .map(str::to_string)
}

fn extract_event_and_data(event_block: &str) -> Option<(String, String)> {
    let mut event_name = None;
    let mut data = None;
    for line in event_block.lines() {
        if let Some(name) = line.strip_prefix("event: ") {
            event_name = Some(name.to_string());
        } else if let Some(d) = line.strip_prefix("data: ") {
            data = Some(d.to_string());
        }
    }
    Some((event_name?, data?))
}
