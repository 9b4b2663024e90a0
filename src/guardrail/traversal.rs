//! Anthropic-shaped request body traversal (spec §4.3 "Body traversal").

use std::collections::HashMap;

use serde_json::Value;

use super::registry::GuardrailRegistry;

/// Walk `body` (an Anthropic Messages request) and anonymize every string
/// the spec marks as in-scope: `system` (string or array of text blocks),
/// each message's `content` (string, or array of blocks). `thinking` blocks
/// are left untouched because upstream signatures depend on their exact
/// text. Unknown block shapes pass through verbatim.
pub fn anonymize_body(registry: &GuardrailRegistry, body: &mut Value, reverse_map: &mut HashMap<String, String>) -> usize {
    let mut total = 0;

    if let Some(system) = body.get_mut("system") {
        total += anonymize_system(registry, system, reverse_map);
    }

    if let Some(Value::Array(messages)) = body.get_mut("messages") {
        for message in messages {
            if let Some(content) = message.get_mut("content") {
                total += anonymize_content(registry, content, reverse_map);
            }
        }
    }

    total
}

fn anonymize_system(registry: &GuardrailRegistry, system: &mut Value, reverse_map: &mut HashMap<String, String>) -> usize {
    match system {
        Value::String(s) => {
            let (out, count) = registry.anonymize(s, reverse_map);
            *s = out;
            count
        }
        Value::Array(blocks) => {
            let mut total = 0;
            for block in blocks {
                if block.get("type").and_then(Value::as_str) == Some("text") {
                    if let Some(Value::String(text)) = block.get_mut("text") {
                        let (out, count) = registry.anonymize(text, reverse_map);
                        *text = out;
                        total += count;
                    }
                }
            }
            total
        }
        _ => 0,
    }
}

fn anonymize_content(registry: &GuardrailRegistry, content: &mut Value, reverse_map: &mut HashMap<String, String>) -> usize {
    match content {
        Value::String(s) => {
            let (out, count) = registry.anonymize(s, reverse_map);
            *s = out;
            count
        }
        Value::Array(blocks) => {
            let mut total = 0;
            for block in blocks {
                total += anonymize_block(registry, block, reverse_map);
            }
            total
        }
        _ => 0,
    }
}

fn anonymize_block(registry: &GuardrailRegistry, block: &mut Value, reverse_map: &mut HashMap<String, String>) -> usize {
    let block_type = block.get("type").and_then(Value::as_str).map(str::to_string);
    match block_type.as_deref() {
        // Thinking blocks carry signatures over their exact text; must not
        // be touched (spec §4.3).
        Some("thinking") => 0,
        Some("text") => {
            if let Some(Value::String(text)) = block.get_mut("text") {
                let (out, count) = registry.anonymize(text, reverse_map);
                *text = out;
                count
            } else {
                0
            }
        }
        Some("tool_result") => {
            if let Some(inner) = block.get_mut("content") {
                anonymize_tool_result_content(registry, inner, reverse_map)
            } else {
                0
            }
        }
        _ => {
            // Unknown shapes pass through untouched, except a bare `text`
            // field the spec calls out as worth anonymizing anyway.
            if let Some(Value::String(text)) = block.get_mut("text") {
                let (out, count) = registry.anonymize(text, reverse_map);
                *text = out;
                count
            } else {
                0
            }
        }
    }
}

fn anonymize_tool_result_content(
    registry: &GuardrailRegistry,
    content: &mut Value,
    reverse_map: &mut HashMap<String, String>,
) -> usize {
    match content {
        Value::String(s) => {
            let (out, count) = registry.anonymize(s, reverse_map);
            *s = out;
            count
        }
        Value::Array(blocks) => {
            let mut total = 0;
            for block in blocks {
                if block.get("type").and_then(Value::as_str) == Some("text") {
                    if let Some(Value::String(text)) = block.get_mut("text") {
                        let (out, count) = registry.anonymize(text, reverse_map);
                        *text = out;
                        total += count;
                    }
                }
            }
            total
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn anonymizes_system_string_and_message_text() {
        let registry = GuardrailRegistry::new([4u8; 32]);
        let mut map = HashMap::new();
        let mut body = json!({
            "system": "contact admin@example.com",
            "messages": [
                {"role": "user", "content": "my ssn is 123-45-6789"}
            ]
        });
        let count = anonymize_body(&registry, &mut body, &mut map);
        assert!(count >= 2);
        assert!(!body["system"].as_str().unwrap().contains("admin@example.com"));
        assert!(!body["messages"][0]["content"].as_str().unwrap().contains("123-45-6789"));
    }

    #[test]
    fn thinking_blocks_are_never_modified() {
        let registry = GuardrailRegistry::new([4u8; 32]);
        let mut map = HashMap::new();
        let mut body = json!({
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "thinking", "text": "ssn 123-45-6789 stays put", "signature": "abc"}
                ]}
            ]
        });
        anonymize_body(&registry, &mut body, &mut map);
        assert_eq!(
            body["messages"][0]["content"][0]["text"].as_str().unwrap(),
            "ssn 123-45-6789 stays put"
        );
    }

    #[test]
    fn tool_result_array_content_is_anonymized() {
        let registry = GuardrailRegistry::new([4u8; 32]);
        let mut map = HashMap::new();
        let mut body = json!({
            "messages": [
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "t1", "content": [
                        {"type": "text", "text": "email bob@example.com"}
                    ]}
                ]}
            ]
        });
        anonymize_body(&registry, &mut body, &mut map);
        let text = body["messages"][0]["content"][0]["content"][0]["text"].as_str().unwrap();
        assert!(!text.contains("bob@example.com"));
    }
}
