//! Request body conversion, both directions (spec §4.4).

use serde_json::{json, Map, Value};

use crate::models::{is_deepseek_reasoner, ModelLimitsTable};

use super::ConvertError;

fn as_str(v: &Value) -> Option<&str> {
    v.as_str()
}

/// Anthropic Messages request → OpenAI Chat Completions request.
/// `target_model` is the resolver-selected outbound model, which always
/// wins over the client-requested `model` field (spec §4.4 "Target model").
pub fn anthropic_request_to_openai(body: &Value, target_model: &str) -> Result<Value, ConvertError> {
    let body = body.as_object().ok_or(ConvertError::Malformed("body is not an object"))?;
    let mut messages: Vec<Value> = Vec::new();

    if let Some(system) = body.get("system") {
        match system {
            Value::String(s) => messages.push(json!({"role": "system", "content": s})),
            Value::Array(blocks) => {
                let joined = blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(as_str) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(as_str))
                    .collect::<Vec<_>>()
                    .join("\n");
                if !joined.is_empty() {
                    messages.push(json!({"role": "system", "content": joined}));
                }
            }
            _ => {}
        }
    }

    if let Some(Value::Array(msgs)) = body.get("messages") {
        for message in msgs {
            let role = message.get("role").and_then(as_str).unwrap_or("user");
            convert_message(role, message.get("content"), &mut messages)?;
        }
    }

    let mut out = Map::new();
    out.insert("model".to_string(), Value::String(target_model.to_string()));
    out.insert("messages".to_string(), Value::Array(messages));

    if let Some(max_tokens) = body.get("max_tokens").and_then(Value::as_u64) {
        let clamped = ModelLimitsTable::default().clamp_max_tokens(max_tokens as u32, target_model);
        out.insert("max_tokens".to_string(), json!(clamped));
    }
    for key in ["temperature", "top_p"] {
        if let Some(v) = body.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    let is_stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    out.insert("stream".to_string(), Value::Bool(is_stream));
    if is_stream {
        out.insert("stream_options".to_string(), json!({"include_usage": true}));
    }
    if let Some(stop) = body.get("stop_sequences") {
        out.insert("stop".to_string(), stop.clone());
    }
    if let Some(Value::Array(tools)) = body.get("tools") {
        let mapped: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.get("name").cloned().unwrap_or(Value::Null),
                        "description": t.get("description").cloned().unwrap_or(Value::Null),
                        "parameters": t.get("input_schema").cloned().unwrap_or_else(|| json!({})),
                    }
                })
            })
            .collect();
        out.insert("tools".to_string(), Value::Array(mapped));
    }
    if let Some(tool_choice) = body.get("tool_choice") {
        out.insert("tool_choice".to_string(), map_tool_choice_to_openai(tool_choice));
    }

    if is_deepseek_reasoner(target_model) {
        if let Some(messages) = out.get_mut("messages").and_then(Value::as_array_mut) {
            for m in messages {
                if m.get("role").and_then(as_str) == Some("assistant") && m.get("tool_calls").is_some() {
                    m.as_object_mut()
                        .unwrap()
                        .insert("reasoning_content".to_string(), Value::String(String::new()));
                }
            }
        }
    }

    Ok(Value::Object(out))
}

fn map_tool_choice_to_openai(tool_choice: &Value) -> Value {
    match tool_choice.get("type").and_then(as_str) {
        Some("auto") => Value::String("auto".to_string()),
        Some("any") => Value::String("required".to_string()),
        Some("tool") => {
            let name = tool_choice.get("name").cloned().unwrap_or(Value::Null);
            json!({"type": "function", "function": {"name": name}})
        }
        _ => Value::String("auto".to_string()),
    }
}

/// Convert one Anthropic message into zero or more OpenAI messages,
/// appending to `out`.
fn convert_message(role: &str, content: Option<&Value>, out: &mut Vec<Value>) -> Result<(), ConvertError> {
    let content = match content {
        Some(c) => c,
        None => return Ok(()),
    };

    match content {
        Value::String(s) => {
            out.push(json!({"role": role, "content": s}));
            return Ok(());
        }
        Value::Array(blocks) => {
            let mut parts: Vec<Value> = Vec::new();
            let mut tool_calls: Vec<Value> = Vec::new();

            for block in blocks {
                let block_type = block.get("type").and_then(as_str).unwrap_or("");
                match block_type {
                    "text" => {
                        if let Some(text) = block.get("text").and_then(as_str) {
                            parts.push(json!({"type": "text", "text": text}));
                        }
                    }
                    "image" => {
                        if let Some(source) = block.get("source") {
                            let source_type = source.get("type").and_then(as_str).unwrap_or("");
                            let url = if source_type == "base64" {
                                let media_type = source.get("media_type").and_then(as_str).unwrap_or("image/png");
                                let data = source.get("data").and_then(as_str).unwrap_or("");
                                format!("data:{media_type};base64,{data}")
                            } else {
                                source.get("url").and_then(as_str).unwrap_or("").to_string()
                            };
                            parts.push(json!({"type": "image_url", "image_url": {"url": url}}));
                        }
                    }
                    "tool_use" => {
                        let id = block.get("id").cloned().unwrap_or(Value::Null);
                        let name = block.get("name").cloned().unwrap_or(Value::Null);
                        let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
                        let arguments = serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string());
                        tool_calls.push(json!({
                            "id": id,
                            "type": "function",
                            "function": {"name": name, "arguments": arguments},
                        }));
                    }
                    "tool_result" => {
                        let tool_use_id = block.get("tool_use_id").cloned().unwrap_or(Value::Null);
                        let content = tool_result_content_to_string(block.get("content"));
                        out.push(json!({"role": "tool", "tool_call_id": tool_use_id, "content": content}));
                        // Short-circuits the block loop (spec §4.4).
                        return Ok(());
                    }
                    "thinking" => {
                        // Dropped outbound (spec §4.4).
                    }
                    _ => {
                        if let Some(text) = block.get("text").and_then(as_str) {
                            parts.push(json!({"type": "text", "text": text}));
                        }
                    }
                }
            }

            let mut message = Map::new();
            message.insert("role".to_string(), Value::String(role.to_string()));
            if !tool_calls.is_empty() {
                message.insert("tool_calls".to_string(), Value::Array(tool_calls));
                let text_concat: String = parts
                    .iter()
                    .filter(|p| p.get("type").and_then(as_str) == Some("text"))
                    .filter_map(|p| p.get("text").and_then(as_str))
                    .collect::<Vec<_>>()
                    .concat();
                message.insert(
                    "content".to_string(),
                    if text_concat.is_empty() { Value::Null } else { Value::String(text_concat) },
                );
            } else if parts.is_empty() {
                message.insert("content".to_string(), Value::Null);
            } else if parts.len() == 1 && parts[0].get("type").and_then(as_str) == Some("text") {
                message.insert(
                    "content".to_string(),
                    parts[0].get("text").cloned().unwrap_or(Value::Null),
                );
            } else {
                message.insert("content".to_string(), Value::Array(parts));
            }
            out.push(Value::Object(message));
            Ok(())
        }
        _ => Ok(()),
    }
}

fn tool_result_content_to_string(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .map(|b| {
                if b.get("type").and_then(as_str) == Some("text") {
                    b.get("text").and_then(as_str).unwrap_or("").to_string()
                } else {
                    serde_json::to_string(b).unwrap_or_default()
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => serde_json::to_string(other).unwrap_or_default(),
        None => String::new(),
    }
}

/// OpenAI Chat Completions request → Anthropic Messages request (reverse
/// direction, spec §4.4).
pub fn openai_request_to_anthropic(body: &Value) -> Result<Value, ConvertError> {
    let body = body.as_object().ok_or(ConvertError::Malformed("body is not an object"))?;

    let mut system_blocks: Vec<Value> = Vec::new();
    let mut messages: Vec<Value> = Vec::new();

    if let Some(Value::Array(msgs)) = body.get("messages") {
        for message in msgs {
            let role = message.get("role").and_then(as_str).unwrap_or("user");
            match role {
                "system" => {
                    if let Some(text) = message.get("content").and_then(as_str) {
                        system_blocks.push(json!({"type": "text", "text": text}));
                    }
                }
                "tool" => {
                    let tool_call_id = message.get("tool_call_id").cloned().unwrap_or(Value::Null);
                    let content = message.get("content").cloned().unwrap_or(Value::Null);
                    messages.push(json!({
                        "role": "user",
                        "content": [{"type": "tool_result", "tool_use_id": tool_call_id, "content": content}],
                    }));
                }
                _ => {
                    messages.push(convert_openai_message(role, message)?);
                }
            }
        }
    }

    let mut out = Map::new();
    if let Some(model) = body.get("model") {
        out.insert("model".to_string(), model.clone());
    }
    if !system_blocks.is_empty() {
        out.insert("system".to_string(), Value::Array(system_blocks));
    }
    out.insert("messages".to_string(), Value::Array(messages));

    let max_tokens = body
        .get("max_tokens")
        .or_else(|| body.get("max_completion_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(4096);
    out.insert("max_tokens".to_string(), json!(max_tokens));

    if let Some(stream) = body.get("stream") {
        out.insert("stream".to_string(), stream.clone());
    }
    if let Some(stop) = body.get("stop") {
        let stop_sequences = match stop {
            Value::Array(_) => stop.clone(),
            other => Value::Array(vec![other.clone()]),
        };
        out.insert("stop_sequences".to_string(), stop_sequences);
    }
    if let Some(Value::Array(tools)) = body.get("tools") {
        let mapped: Vec<Value> = tools
            .iter()
            .filter_map(|t| t.get("function"))
            .map(|f| {
                json!({
                    "name": f.get("name").cloned().unwrap_or(Value::Null),
                    "description": f.get("description").cloned().unwrap_or(Value::Null),
                    "input_schema": f.get("parameters").cloned().unwrap_or_else(|| json!({})),
                })
            })
            .collect();
        out.insert("tools".to_string(), Value::Array(mapped));
    }
    if let Some(tool_choice) = body.get("tool_choice") {
        if let Some(mapped) = map_tool_choice_to_anthropic(tool_choice) {
            out.insert("tool_choice".to_string(), mapped);
        }
    }

    Ok(Value::Object(out))
}

fn map_tool_choice_to_anthropic(tool_choice: &Value) -> Option<Value> {
    match tool_choice {
        Value::String(s) if s == "auto" => Some(json!({"type": "auto"})),
        Value::String(s) if s == "required" => Some(json!({"type": "any"})),
        Value::String(s) if s == "none" => None,
        Value::Object(_) => {
            let name = tool_choice.get("function").and_then(|f| f.get("name")).cloned();
            name.map(|name| json!({"type": "tool", "name": name}))
        }
        _ => None,
    }
}

fn convert_openai_message(role: &str, message: &Value) -> Result<Value, ConvertError> {
    let mut blocks: Vec<Value> = Vec::new();

    match message.get("content") {
        Some(Value::String(s)) => blocks.push(json!({"type": "text", "text": s})),
        Some(Value::Array(parts)) => {
            for part in parts {
                match part.get("type").and_then(as_str) {
                    Some("text") => {
                        if let Some(text) = part.get("text").and_then(as_str) {
                            blocks.push(json!({"type": "text", "text": text}));
                        }
                    }
                    Some("image_url") => {
                        let url = part
                            .get("image_url")
                            .and_then(|i| i.get("url"))
                            .and_then(as_str)
                            .unwrap_or("");
                        if let Some(rest) = url.strip_prefix("data:") {
                            if let Some((mt, data)) = rest.split_once(";base64,") {
                                blocks.push(json!({
                                    "type": "image",
                                    "source": {"type": "base64", "media_type": mt, "data": data},
                                }));
                                continue;
                            }
                        }
                        blocks.push(json!({"type": "image", "source": {"type": "url", "url": url}}));
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }

    if let Some(Value::Array(tool_calls)) = message.get("tool_calls") {
        for tc in tool_calls {
            let id = tc.get("id").cloned().unwrap_or(Value::Null);
            let function = tc.get("function").cloned().unwrap_or_else(|| json!({}));
            let name = function.get("name").cloned().unwrap_or(Value::Null);
            let arguments_str = function.get("arguments").and_then(as_str).unwrap_or("{}");
            let input: Value = serde_json::from_str(arguments_str).unwrap_or_else(|_| json!({}));
            blocks.push(json!({"type": "tool_use", "id": id, "name": name, "input": input}));
        }
    }

    Ok(json!({"role": role, "content": blocks}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_system_string_becomes_openai_system_message() {
        let body = json!({
            "system": "be nice",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 100,
        });
        let out = anthropic_request_to_openai(&body, "gpt-4o").unwrap();
        assert_eq!(out["messages"][0]["role"], "system");
        assert_eq!(out["messages"][0]["content"], "be nice");
        assert_eq!(out["model"], "gpt-4o");
    }

    #[test]
    fn tool_result_block_emits_standalone_tool_message() {
        let body = json!({
            "messages": [{"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "abc", "content": "42"}
            ]}],
        });
        let out = anthropic_request_to_openai(&body, "gpt-4o").unwrap();
        assert_eq!(out["messages"][0]["role"], "tool");
        assert_eq!(out["messages"][0]["tool_call_id"], "abc");
        assert_eq!(out["messages"][0]["content"], "42");
    }

    #[test]
    fn tool_use_blocks_become_tool_calls_with_text_concatenated() {
        let body = json!({
            "messages": [{"role": "assistant", "content": [
                {"type": "text", "text": "checking"},
                {"type": "tool_use", "id": "t1", "name": "lookup", "input": {"q": "x"}},
            ]}],
        });
        let out = anthropic_request_to_openai(&body, "gpt-4o").unwrap();
        let m = &out["messages"][0];
        assert_eq!(m["content"], "checking");
        assert_eq!(m["tool_calls"][0]["function"]["name"], "lookup");
    }

    #[test]
    fn stream_true_adds_stream_options() {
        let body = json!({"messages": [], "stream": true});
        let out = anthropic_request_to_openai(&body, "gpt-4o").unwrap();
        assert_eq!(out["stream_options"]["include_usage"], true);
    }

    #[test]
    fn openai_tool_message_round_trips_to_tool_result() {
        let body = json!({
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "tool_calls": [{"id": "t1", "type": "function", "function": {"name": "f", "arguments": "{}"}}]},
                {"role": "tool", "tool_call_id": "t1", "content": "result"},
            ],
        });
        let out = openai_request_to_anthropic(&body).unwrap();
        let messages = out["messages"].as_array().unwrap();
        let tool_msg = &messages[2];
        assert_eq!(tool_msg["content"][0]["type"], "tool_result");
        assert_eq!(tool_msg["content"][0]["tool_use_id"], "t1");
    }

    #[test]
    fn openai_max_completion_tokens_falls_back_correctly() {
        let body = json!({"messages": [], "max_completion_tokens": 500});
        let out = openai_request_to_anthropic(&body).unwrap();
        assert_eq!(out["max_tokens"], 500);
    }

    #[test]
    fn openai_request_defaults_max_tokens_to_4096() {
        let body = json!({"messages": []});
        let out = openai_request_to_anthropic(&body).unwrap();
        assert_eq!(out["max_tokens"], 4096);
    }
}
