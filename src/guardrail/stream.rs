//! Streaming deanonymization with safe-flush-point buffering (spec §4.3
//! "Streaming deanonymization").
//!
//! A single anonymized token can straddle multiple SSE `text_delta` /
//! `input_json_delta` events, so the engine buffers per-content-block text
//! and only emits a prefix it's sure isn't a truncated token.

use std::collections::HashMap;

use super::registry::GuardrailRegistry;

/// Per-block text buffer plus the safe-flush logic from spec §4.3.
pub struct StreamDeanonymizer<'a> {
    registry: &'a GuardrailRegistry,
    buffers: HashMap<u64, String>,
}

impl<'a> StreamDeanonymizer<'a> {
    pub fn new(registry: &'a GuardrailRegistry) -> Self {
        Self {
            registry,
            buffers: HashMap::new(),
        }
    }

    /// Append `fragment` to the buffer for `block_index` and return
    /// whatever is now safe to emit, deanonymized. Returns an empty string
    /// if nothing new is safe yet.
    pub fn push(&mut self, block_index: u64, fragment: &str, reverse_map: &HashMap<String, String>) -> String {
        let buffer = self.buffers.entry(block_index).or_default();
        buffer.push_str(fragment);
        let safe_len = safe_flush_point(buffer, reverse_map);
        let emit: String = buffer.drain(..safe_len).collect();
        self.registry.deanonymize(&emit, reverse_map)
    }

    /// Flush everything buffered for `block_index` unconditionally — called
    /// on `content_block_stop` (spec §4.3).
    pub fn flush(&mut self, block_index: u64, reverse_map: &HashMap<String, String>) -> String {
        let remaining = self.buffers.remove(&block_index).unwrap_or_default();
        self.registry.deanonymize(&remaining, reverse_map)
    }

    /// Flush every remaining buffer — called at stream end (spec §4.3).
    pub fn flush_all(&mut self, reverse_map: &HashMap<String, String>) -> String {
        let mut out = String::new();
        let keys: Vec<u64> = self.buffers.keys().copied().collect();
        for key in keys {
            out.push_str(&self.flush(key, reverse_map));
        }
        out
    }
}

/// How many bytes of `buffer` (from the start) are safe to flush right now,
/// per spec §4.3's three-rule cascade.
fn safe_flush_point(buffer: &str, reverse_map: &HashMap<String, String>) -> usize {
    let len = buffer.len();
    let tail_start = len.saturating_sub(200);
    if let Some(rel_pos) = buffer[tail_start..].rfind('[') {
        let abs_pos = tail_start + rel_pos;
        if !buffer[abs_pos..].contains(']') {
            return abs_pos;
        }
    }

    let max_overlap = reverse_map
        .keys()
        .filter(|key| key.len() > 3)
        .map(|key| longest_suffix_prefix_overlap(buffer, key))
        .max()
        .unwrap_or(0);

    len.saturating_sub(max_overlap)
}

/// The longest `k` in `3..key.len()` such that `buffer`'s last `k` bytes
/// equal a proper prefix of `key` (spec §4.3 "maxOverlap").
fn longest_suffix_prefix_overlap(buffer: &str, key: &str) -> usize {
    let max_k = key.len().saturating_sub(1);
    let buf_len = buffer.len();
    for k in (3..=max_k.min(buf_len)).rev() {
        if buffer[buf_len - k..] == key[..k] {
            return k;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flushes_plain_text_immediately_when_no_bracket_pending() {
        let registry = GuardrailRegistry::new([5u8; 32]);
        let mut dz = StreamDeanonymizer::new(&registry);
        let map = HashMap::new();
        let out = dz.push(0, "hello there, ", &map);
        assert_eq!(out, "hello there, ");
    }

    #[test]
    fn withholds_unclosed_bracket_near_buffer_tail() {
        let registry = GuardrailRegistry::new([5u8; 32]);
        let mut dz = StreamDeanonymizer::new(&registry);
        let map = HashMap::new();
        let out = dz.push(0, "your ssn is [SSN-abc", &map);
        assert_eq!(out, "your ssn is ");
    }

    #[test]
    fn full_token_across_two_fragments_is_reassembled_before_emit() {
        let registry = GuardrailRegistry::new([5u8; 32]);
        let mut map = HashMap::new();
        let (_, _) = registry.anonymize("", &mut map); // no-op, establishes registry use
        let token = super::super::crypto::encode_token(registry.key(), "SSN", "123-45-6789");
        map.insert(format!("[SSN-{token}]"), "123-45-6789".to_string());

        let mut dz = StreamDeanonymizer::new(&registry);
        let first_half = &format!("[SSN-{token}]")[..10];
        let second_half = &format!("[SSN-{token}]")[10..];
        let out1 = dz.push(0, first_half, &map);
        assert!(out1.is_empty() || !out1.contains("123-45-6789"));
        let out2 = dz.push(0, second_half, &map);
        let mut combined = out1;
        combined.push_str(&out2);
        assert!(combined.contains("123-45-6789"));
    }

    #[test]
    fn flush_emits_whatever_remains_unconditionally() {
        let registry = GuardrailRegistry::new([5u8; 32]);
        let mut dz = StreamDeanonymizer::new(&registry);
        let map = HashMap::new();
        dz.push(0, "trailing [unterminated", &map);
        let out = dz.flush(0, &map);
        assert_eq!(out, "trailing [unterminated");
    }
}
