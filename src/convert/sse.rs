//! SSE stream conversion, both directions (spec §4.4 "SSE conversion").
//!
//! Both converters are incremental state machines: the caller feeds them one
//! parsed upstream event at a time (as it arrives off the wire) and gets back
//! zero or more already-formatted downstream SSE event strings to forward.
//! Neither converter buffers whole responses — that's what keeps streaming
//! latency close to the upstream's.

use std::collections::HashMap;

use serde_json::{json, Value};

use super::response::{epoch_ms, random_alnum, stop_reason_to_finish_reason};

fn format_anthropic_event(event: &str, data: &Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

fn format_openai_chunk(data: &Value) -> String {
    format!("data: {data}\n\n")
}

/// OpenAI Chat Completions stream → Anthropic Messages stream.
///
/// Tracks a monotonically increasing content-block index, which OpenAI
/// tool-call indices map onto Anthropic block indices, and whether the text
/// and thinking blocks have been opened yet.
pub struct OpenAiToAnthropicSse {
    started: bool,
    message_id: String,
    next_index: u64,
    started_blocks: Vec<u64>,
    tool_call_blocks: HashMap<u64, u64>,
    text_block_index: Option<u64>,
    thinking_block_index: Option<u64>,
    last_finish_reason: Option<String>,
    output_tokens: u64,
}

impl Default for OpenAiToAnthropicSse {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiToAnthropicSse {
    pub fn new() -> Self {
        Self {
            started: false,
            message_id: String::new(),
            next_index: 0,
            started_blocks: Vec::new(),
            tool_call_blocks: HashMap::new(),
            text_block_index: None,
            thinking_block_index: None,
            last_finish_reason: None,
            output_tokens: 0,
        }
    }

    fn ensure_started(&mut self, value: &Value, out: &mut Vec<String>) {
        if self.started {
            return;
        }
        self.started = true;
        self.message_id = value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("msg_{}", epoch_ms()));
        let model = value.get("model").and_then(Value::as_str).unwrap_or("").to_string();
        out.push(format_anthropic_event(
            "message_start",
            &json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "model": model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {"input_tokens": 0, "output_tokens": 0},
                },
            }),
        ));
    }

    fn open_block(&mut self, content_block: Value, out: &mut Vec<String>) -> u64 {
        let idx = self.next_index;
        self.next_index += 1;
        self.started_blocks.push(idx);
        out.push(format_anthropic_event(
            "content_block_start",
            &json!({"type": "content_block_start", "index": idx, "content_block": content_block}),
        ));
        idx
    }

    fn ensure_text_block(&mut self, out: &mut Vec<String>) -> u64 {
        if let Some(idx) = self.text_block_index {
            return idx;
        }
        let idx = self.open_block(json!({"type": "text", "text": ""}), out);
        self.text_block_index = Some(idx);
        idx
    }

    /// Feed one parsed `data: {...}` payload. Returns Anthropic SSE events
    /// to forward, in order; may be empty.
    pub fn push(&mut self, value: &Value) -> Vec<String> {
        let mut out = Vec::new();
        self.ensure_started(value, &mut out);

        if let Some(tokens) = value
            .get("usage")
            .and_then(|u| u.get("completion_tokens"))
            .and_then(Value::as_u64)
        {
            self.output_tokens = tokens;
        }

        let Some(choice) = value.get("choices").and_then(Value::as_array).and_then(|c| c.first()) else {
            return out;
        };
        if let Some(fr) = choice.get("finish_reason").and_then(Value::as_str) {
            self.last_finish_reason = Some(fr.to_string());
        }
        let Some(delta) = choice.get("delta") else {
            return out;
        };

        // DeepSeek-reasoner style thinking stream (spec §4.4 special case).
        if let Some(reasoning) = delta.get("reasoning_content").and_then(Value::as_str) {
            if !reasoning.is_empty() {
                let idx = match self.thinking_block_index {
                    Some(idx) => idx,
                    None => {
                        let idx = self.open_block(json!({"type": "thinking", "thinking": ""}), &mut out);
                        self.thinking_block_index = Some(idx);
                        idx
                    }
                };
                out.push(format_anthropic_event(
                    "content_block_delta",
                    &json!({"type": "content_block_delta", "index": idx, "delta": {"type": "thinking_delta", "thinking": reasoning}}),
                ));
            }
        }

        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                let idx = self.ensure_text_block(&mut out);
                out.push(format_anthropic_event(
                    "content_block_delta",
                    &json!({"type": "content_block_delta", "index": idx, "delta": {"type": "text_delta", "text": text}}),
                ));
            }
        }

        if let Some(Value::Array(tool_calls)) = delta.get("tool_calls") {
            for tc in tool_calls {
                let openai_index = tc.get("index").and_then(Value::as_u64).unwrap_or(0);

                if let Some(name) = tc.get("function").and_then(|f| f.get("name")).and_then(Value::as_str) {
                    // A text block always sits at index 0 (spec §4.4): if a
                    // tool call is the first thing to arrive, open an empty
                    // placeholder text block first.
                    if self.text_block_index.is_none() {
                        self.ensure_text_block(&mut out);
                    }
                    let id = tc
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("toolu_{}_{}", epoch_ms(), random_alnum(6)));
                    let idx = self.open_block(
                        json!({"type": "tool_use", "id": id, "name": name, "input": {}}),
                        &mut out,
                    );
                    self.tool_call_blocks.insert(openai_index, idx);
                }

                if let Some(args) = tc.get("function").and_then(|f| f.get("arguments")).and_then(Value::as_str) {
                    if let Some(&idx) = self.tool_call_blocks.get(&openai_index) {
                        out.push(format_anthropic_event(
                            "content_block_delta",
                            &json!({"type": "content_block_delta", "index": idx, "delta": {"type": "input_json_delta", "partial_json": args}}),
                        ));
                    }
                }
            }
        }

        out
    }

    /// Called on `[DONE]`: closes every open block, then emits the
    /// `message_delta`/`message_stop` pair.
    pub fn finish(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        let mut blocks = self.started_blocks.clone();
        blocks.sort_unstable();
        for idx in blocks {
            out.push(format_anthropic_event(
                "content_block_stop",
                &json!({"type": "content_block_stop", "index": idx}),
            ));
        }

        let stop_reason = match self.last_finish_reason.as_deref() {
            Some("tool_calls") => "tool_use",
            Some("length") => "max_tokens",
            _ => "end_turn",
        };
        out.push(format_anthropic_event(
            "message_delta",
            &json!({
                "type": "message_delta",
                "delta": {"stop_reason": stop_reason, "stop_sequence": null},
                "usage": {"output_tokens": self.output_tokens},
            }),
        ));
        out.push(format_anthropic_event("message_stop", &json!({"type": "message_stop"})));
        out
    }
}

/// Anthropic Messages stream → OpenAI Chat Completions stream.
pub struct AnthropicToOpenAiSse {
    chat_id: String,
}

impl Default for AnthropicToOpenAiSse {
    fn default() -> Self {
        Self::new()
    }
}

impl AnthropicToOpenAiSse {
    pub fn new() -> Self {
        Self { chat_id: String::new() }
    }

    /// Feed one parsed Anthropic SSE event (`event:` name plus its `data:`
    /// payload). Returns OpenAI SSE chunks to forward, in order; may be
    /// empty. `message_stop` yields the terminating `data: [DONE]`.
    pub fn push(&mut self, event: &str, data: &Value) -> Vec<String> {
        match event {
            "message_start" => {
                let id = data
                    .get("message")
                    .and_then(|m| m.get("id"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                self.chat_id = format!("chatcmpl-{id}");
                vec![format_openai_chunk(&json!({
                    "id": self.chat_id,
                    "object": "chat.completion.chunk",
                    "choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}, "finish_reason": null}],
                }))]
            }
            "content_block_delta" => {
                let delta = data.get("delta").cloned().unwrap_or_else(|| json!({}));
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => {
                        let text = delta.get("text").and_then(Value::as_str).unwrap_or("");
                        vec![format_openai_chunk(&json!({
                            "id": self.chat_id,
                            "object": "chat.completion.chunk",
                            "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}],
                        }))]
                    }
                    Some("input_json_delta") => {
                        let index = data.get("index").and_then(Value::as_u64).unwrap_or(0);
                        let partial = delta.get("partial_json").and_then(Value::as_str).unwrap_or("");
                        vec![format_openai_chunk(&json!({
                            "id": self.chat_id,
                            "object": "chat.completion.chunk",
                            "choices": [{"index": 0, "delta": {"tool_calls": [{"index": index, "function": {"arguments": partial}}]}, "finish_reason": null}],
                        }))]
                    }
                    _ => vec![],
                }
            }
            "content_block_start" => {
                let block = data.get("content_block").cloned().unwrap_or_else(|| json!({}));
                if block.get("type").and_then(Value::as_str) != Some("tool_use") {
                    return vec![];
                }
                let index = data.get("index").and_then(Value::as_u64).unwrap_or(1).saturating_sub(1);
                let id = block.get("id").cloned().unwrap_or(Value::Null);
                let name = block.get("name").cloned().unwrap_or(Value::Null);
                vec![format_openai_chunk(&json!({
                    "id": self.chat_id,
                    "object": "chat.completion.chunk",
                    "choices": [{"index": 0, "delta": {"tool_calls": [{"index": index, "id": id, "type": "function", "function": {"name": name, "arguments": ""}}]}, "finish_reason": null}],
                }))]
            }
            "message_delta" => {
                let stop_reason = data.get("delta").and_then(|d| d.get("stop_reason")).and_then(Value::as_str);
                let Some(stop_reason) = stop_reason else {
                    return vec![];
                };
                let finish_reason = stop_reason_to_finish_reason(Some(stop_reason));
                let mut chunk = json!({
                    "id": self.chat_id,
                    "object": "chat.completion.chunk",
                    "choices": [{"index": 0, "delta": {}, "finish_reason": finish_reason}],
                });
                if let Some(output_tokens) = data.get("usage").and_then(|u| u.get("output_tokens")).and_then(Value::as_u64) {
                    chunk["usage"] = json!({
                        "prompt_tokens": 0,
                        "completion_tokens": output_tokens,
                        "total_tokens": output_tokens,
                    });
                }
                vec![format_openai_chunk(&chunk)]
            }
            "message_stop" => vec!["data: [DONE]\n\n".to_string()],
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_to_anthropic_text_stream_opens_block_at_index_zero() {
        let mut conv = OpenAiToAnthropicSse::new();
        let mut events = conv.push(&json!({"id": "chatcmpl-1", "model": "gpt-4o", "choices": [{"delta": {"content": "Hi"}}]}));
        events.extend(conv.push(&json!({"choices": [{"delta": {"content": " there"}, "finish_reason": "stop"}]})));
        events.extend(conv.finish());

        assert!(events[0].starts_with("event: message_start"));
        assert!(events.iter().any(|e| e.contains("\"index\":0") && e.contains("text_delta")));
        assert!(events.iter().any(|e| e.contains("message_delta") && e.contains("end_turn")));
        assert!(events.last().unwrap().contains("message_stop"));
    }

    #[test]
    fn openai_to_anthropic_tool_call_before_text_gets_placeholder_text_block() {
        let mut conv = OpenAiToAnthropicSse::new();
        let mut events = conv.push(&json!({"id": "chatcmpl-2", "choices": [{"delta": {"tool_calls": [{"index": 0, "id": "call_1", "function": {"name": "lookup"}}]}}]}));
        events.extend(conv.push(&json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "{\"q\":1}"}}]}, "finish_reason": "tool_calls"}]})));
        events.extend(conv.finish());

        let starts: Vec<&str> = events.iter().filter(|e| e.contains("content_block_start")).map(String::as_str).collect();
        assert!(starts[0].contains("\"index\":0") && starts[0].contains("\"type\":\"text\""));
        assert!(starts[1].contains("\"index\":1") && starts[1].contains("tool_use"));
        assert!(events.iter().any(|e| e.contains("input_json_delta") && e.contains("\"index\":1")));
        assert!(events.iter().any(|e| e.contains("message_delta") && e.contains("tool_use")));
    }

    #[test]
    fn openai_to_anthropic_thinking_deltas_use_their_own_block() {
        let mut conv = OpenAiToAnthropicSse::new();
        let mut events = conv.push(&json!({"id": "chatcmpl-3", "choices": [{"delta": {"reasoning_content": "step one"}}]}));
        events.extend(conv.push(&json!({"choices": [{"delta": {"reasoning_content": " step two"}}]})));
        assert!(events.iter().any(|e| e.contains("\"type\":\"thinking\"")));
        assert_eq!(events.iter().filter(|e| e.contains("content_block_start")).count(), 1);
    }

    #[test]
    fn anthropic_to_openai_text_stream_round_trips_through_done() {
        let mut conv = AnthropicToOpenAiSse::new();
        let mut out = conv.push("message_start", &json!({"message": {"id": "msg_1"}}));
        out.extend(conv.push("content_block_delta", &json!({"delta": {"type": "text_delta", "text": "hi"}})));
        out.extend(conv.push("message_delta", &json!({"delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 2}})));
        out.extend(conv.push("message_stop", &json!({})));

        assert!(out[0].contains("chatcmpl-msg_1"));
        assert!(out.iter().any(|e| e.contains("\"content\":\"hi\"")));
        assert!(out.iter().any(|e| e.contains("\"finish_reason\":\"stop\"") && e.contains("total_tokens")));
        assert_eq!(out.last().unwrap(), "data: [DONE]\n\n");
    }

    #[test]
    fn anthropic_to_openai_tool_use_block_start_emits_tool_call_shell() {
        let mut conv = AnthropicToOpenAiSse::new();
        conv.push("message_start", &json!({"message": {"id": "msg_2"}}));
        let out = conv.push(
            "content_block_start",
            &json!({"index": 1, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "lookup"}}),
        );
        assert!(out[0].contains("\"index\":0"));
        assert!(out[0].contains("\"id\":\"toolu_1\""));
        assert!(out[0].contains("\"name\":\"lookup\""));
    }
}
