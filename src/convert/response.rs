//! Non-streaming response conversion, both directions (spec §4.4).

use rand::Rng;
use serde_json::{json, Value};

use super::ConvertError;

pub(crate) fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub(crate) fn random_alnum(n: usize) -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..n).map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char).collect()
}

fn finish_reason_to_stop_reason(finish_reason: Option<&str>) -> &'static str {
    match finish_reason {
        Some("stop") => "end_turn",
        Some("length") => "max_tokens",
        Some("tool_calls") => "tool_use",
        _ => "end_turn",
    }
}

pub(crate) fn stop_reason_to_finish_reason(stop_reason: Option<&str>) -> &'static str {
    match stop_reason {
        Some("end_turn") => "stop",
        Some("max_tokens") => "length",
        Some("tool_use") => "tool_calls",
        _ => "stop",
    }
}

/// OpenAI Chat Completions response → Anthropic Messages response.
/// `client_model` is echoed back verbatim (spec §4.4 "`model` MUST be the
/// original client-requested model").
pub fn openai_response_to_anthropic(body: &Value, client_model: &str) -> Result<Value, ConvertError> {
    let choices = body.get("choices").and_then(Value::as_array);
    let id = body
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("msg_{}", epoch_ms()));

    let Some(choice) = choices.and_then(|c| c.first()) else {
        return Ok(json!({
            "id": id,
            "type": "message",
            "role": "assistant",
            "model": client_model,
            "content": [],
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": {"input_tokens": 0, "output_tokens": 0, "cache_creation_input_tokens": 0, "cache_read_input_tokens": 0},
        }));
    };

    let message = choice.get("message").cloned().unwrap_or_else(|| json!({}));
    let mut content: Vec<Value> = Vec::new();
    if let Some(text) = message.get("content").and_then(Value::as_str) {
        content.push(json!({"type": "text", "text": text}));
    }
    if let Some(Value::Array(tool_calls)) = message.get("tool_calls") {
        for tc in tool_calls {
            let function = tc.get("function").cloned().unwrap_or_else(|| json!({}));
            let name = function.get("name").cloned().unwrap_or(Value::Null);
            let arguments = function.get("arguments").and_then(Value::as_str).unwrap_or("{}");
            let input = serde_json::from_str::<Value>(arguments)
                .unwrap_or_else(|_| json!({"_raw": arguments}));
            let tool_id = tc
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("toolu_{}_{}", epoch_ms(), random_alnum(6)));
            content.push(json!({"type": "tool_use", "id": tool_id, "name": name, "input": input}));
        }
    }

    let finish_reason = choice.get("finish_reason").and_then(Value::as_str);
    let usage = body.get("usage").cloned().unwrap_or_else(|| json!({}));
    let input_tokens = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
    let output_tokens = usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0);

    Ok(json!({
        "id": id,
        "type": "message",
        "role": "assistant",
        "model": client_model,
        "content": content,
        "stop_reason": finish_reason_to_stop_reason(finish_reason),
        "stop_sequence": null,
        "usage": {
            "input_tokens": input_tokens,
            "output_tokens": output_tokens,
            "cache_creation_input_tokens": 0,
            "cache_read_input_tokens": 0,
        },
    }))
}

/// Anthropic Messages response → OpenAI Chat Completions response.
/// `target_model` is the caller-visible model name to echo (spec §4.4
/// "echo the caller-visible target `model`").
pub fn anthropic_response_to_openai(body: &Value, target_model: &str) -> Result<Value, ConvertError> {
    let content = body.get("content").and_then(Value::as_array).cloned().unwrap_or_default();

    let text_concat: String = content
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .concat();

    let tool_calls: Vec<Value> = content
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
        .map(|b| {
            let id = b.get("id").cloned().unwrap_or(Value::Null);
            let name = b.get("name").cloned().unwrap_or(Value::Null);
            let input = b.get("input").cloned().unwrap_or_else(|| json!({}));
            let arguments = serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string());
            json!({"id": id, "type": "function", "function": {"name": name, "arguments": arguments}})
        })
        .collect();

    let message_content = if text_concat.is_empty() { Value::Null } else { Value::String(text_concat) };

    let mut message = json!({"role": "assistant", "content": message_content});
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
    }

    let stop_reason = body.get("stop_reason").and_then(Value::as_str);
    let id = body
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| epoch_ms().to_string());

    let input_tokens = body
        .get("usage")
        .and_then(|u| u.get("input_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let output_tokens = body
        .get("usage")
        .and_then(|u| u.get("output_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    Ok(json!({
        "id": format!("chatcmpl-{id}"),
        "object": "chat.completion",
        "created": epoch_secs(),
        "model": target_model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": stop_reason_to_finish_reason(stop_reason),
        }],
        "usage": {
            "prompt_tokens": input_tokens,
            "completion_tokens": output_tokens,
            "total_tokens": input_tokens + output_tokens,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_response_with_text_converts_to_anthropic_message() {
        let body = json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5},
        });
        let out = openai_response_to_anthropic(&body, "claude-sonnet-4-20250514").unwrap();
        assert_eq!(out["type"], "message");
        assert_eq!(out["content"][0]["text"], "Hello!");
        assert_eq!(out["stop_reason"], "end_turn");
        assert_eq!(out["model"], "claude-sonnet-4-20250514");
        assert_eq!(out["usage"]["input_tokens"], 10);
        assert_eq!(out["usage"]["output_tokens"], 5);
    }

    #[test]
    fn openai_empty_choices_yields_empty_anthropic_message() {
        let body = json!({"choices": []});
        let out = openai_response_to_anthropic(&body, "claude-sonnet-4").unwrap();
        assert_eq!(out["content"], json!([]));
        assert_eq!(out["stop_reason"], "end_turn");
    }

    #[test]
    fn openai_tool_calls_become_tool_use_blocks() {
        let body = json!({
            "choices": [{"message": {"tool_calls": [
                {"id": "call_1", "function": {"name": "lookup", "arguments": "{\"q\":1}"}}
            ]}, "finish_reason": "tool_calls"}],
        });
        let out = openai_response_to_anthropic(&body, "claude-sonnet-4").unwrap();
        assert_eq!(out["content"][0]["type"], "tool_use");
        assert_eq!(out["content"][0]["id"], "call_1");
        assert_eq!(out["stop_reason"], "tool_use");
    }

    #[test]
    fn anthropic_response_converts_to_openai_chat_completion() {
        let body = json!({
            "id": "msg_1",
            "content": [{"type": "text", "text": "Hi there"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 2},
        });
        let out = anthropic_response_to_openai(&body, "gpt-4o").unwrap();
        assert_eq!(out["id"], "chatcmpl-msg_1");
        assert_eq!(out["choices"][0]["message"]["content"], "Hi there");
        assert_eq!(out["choices"][0]["finish_reason"], "stop");
        assert_eq!(out["usage"]["total_tokens"], 5);
    }
}
