//! Guardrail registry and pipeline execution (spec §4.3 "Registry and
//! pipeline"): runs detectors in priority order, substitutes reversible
//! tokens, and maintains the process-local reverse map.

use std::cmp::Reverse;
use std::collections::HashMap;

use super::crypto;
use super::detectors::{self, all_detectors};
use super::pattern::{Detector, Match};

/// Skip a match that's already sitting inside one of our own envelope
/// brackets (`[BUCKET-token]` or `prefix[token]`), so re-running anonymize
/// over previously-anonymized text doesn't re-detect its own output (spec
/// §4.3 "Detectors MUST skip tokens they have themselves produced").
fn looks_embedded_in_envelope(text: &str, start: usize, end: usize) -> bool {
    let before = text.as_bytes().get(start.wrapping_sub(1)).copied();
    let after = text.as_bytes().get(end).copied();
    matches!(before, Some(b'[') | Some(b'-')) && matches!(after, Some(b']') | Some(b'-'))
}

/// Registry of detectors plus the shared guardrail key; the single entry
/// point the proxy orchestrator and body traversal call into.
pub struct GuardrailRegistry {
    detectors: Vec<Box<dyn Detector>>,
    key: [u8; 32],
}

impl GuardrailRegistry {
    pub fn new(key: [u8; 32]) -> Self {
        let mut detectors = all_detectors();
        detectors.sort_by_key(|d| d.priority());
        Self { detectors, key }
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// Run the full detector pipeline over `text`, substituting reversible
    /// tokens and feeding discovered mappings into `reverse_map`. Returns
    /// the modified text and the number of detections made.
    pub fn anonymize(&self, text: &str, reverse_map: &mut HashMap<String, String>) -> (String, usize) {
        if text.is_empty() {
            return (text.to_string(), 0);
        }

        let mut all_matches: Vec<Match> = Vec::new();
        for detector in &self.detectors {
            for m in detector.detect(text) {
                if looks_embedded_in_envelope(text, m.start, m.end) {
                    continue;
                }
                all_matches.push(m);
            }
        }

        // Priority order decides who wins an overlap; position order
        // breaks ties and keeps substitution left-to-right stable.
        all_matches.sort_by_key(|m| (m.start, Reverse(m.end)));
        let mut accepted: Vec<Match> = Vec::new();
        'outer: for m in all_matches {
            for existing in &accepted {
                if m.start < existing.end && existing.start < m.end {
                    continue 'outer;
                }
            }
            accepted.push(m);
        }

        let count = accepted.len();
        // Replace back-to-front so earlier byte offsets stay valid.
        accepted.sort_by_key(|m| Reverse(m.start));
        let mut out = text.to_string();
        for m in accepted {
            let (replacement, extra) = self.envelope_for(m.bucket, &m.value);
            out.replace_range(m.start..m.end, &replacement);
            reverse_map.insert(replacement.clone(), m.value.clone());
            for (k, v) in extra {
                reverse_map.entry(k).or_insert(v);
            }
        }
        (out, count)
    }

    /// Build the wire-format envelope for one detected value (spec §6.3),
    /// plus any extra reverse-map entries for inner sub-values (e.g. the
    /// bare fake IPv4 embedded in an `[IP-...]` envelope, per spec §4.3).
    fn envelope_for(&self, bucket: &'static str, value: &str) -> (String, Vec<(String, String)>) {
        match bucket {
            "EMAIL" => {
                let fake = detectors::fake_email_for(&self.key, value);
                (fake.clone(), vec![(fake, value.to_string())])
            }
            "NAME" => {
                let fake = detectors::fake_name_for(&self.key, value);
                (fake.clone(), vec![(fake, value.to_string())])
            }
            "IP" => {
                let fake_ip = detectors::fake_ipv4_for(&self.key, value);
                let token = crypto::encode_token(&self.key, bucket, value);
                let replacement = format!("[IP-{fake_ip}-{token}]");
                (
                    replacement.clone(),
                    vec![(fake_ip, value.to_string()), (replacement, value.to_string())],
                )
            }
            "PHONE" => {
                let digest = crypto::keyed_index(&self.key, value);
                let fake_phone = format!(
                    "{:03}-{:03}-{:04}",
                    100 + (digest[0] as u32) % 900,
                    100 + (digest[1] as u32) % 900,
                    1000 + (digest[2] as u32 * 37 + digest[3] as u32) % 9000
                );
                let token = crypto::encode_token(&self.key, bucket, value);
                let replacement = format!("{fake_phone}-{token}");
                (
                    replacement.clone(),
                    vec![(fake_phone, value.to_string()), (replacement, value.to_string())],
                )
            }
            "redacted" => {
                let token = crypto::encode_token(&self.key, bucket, value);
                let replacement = format!("[redacted-{token}]");
                (replacement.clone(), vec![(replacement, value.to_string())])
            }
            "APIKEY" => {
                let token = crypto::encode_token(&self.key, bucket, value);
                let replacement = match detectors::known_api_key_prefix(value) {
                    Some(prefix) => format!("{prefix}[{token}]"),
                    None => format!("[APIKEY-{token}]"),
                };
                (replacement.clone(), vec![(replacement, value.to_string())])
            }
            other => {
                let token = crypto::encode_token(&self.key, bucket, value);
                let replacement = format!("[{other}-{token}]");
                (replacement.clone(), vec![(replacement, value.to_string())])
            }
        }
    }

    /// Reverse every substitution in `text`: the reverse map is tried first
    /// (longest replacement strings first, so a full bracketed envelope is
    /// restored before any bare inner sub-value it contains), then a
    /// crypto-decode fallback recovers bracketed tokens the map doesn't
    /// know about — e.g. after a process restart — passing anything it
    /// can't verify through unchanged (spec §4.3 "failure-safe").
    pub fn deanonymize(&self, text: &str, reverse_map: &HashMap<String, String>) -> String {
        let mut out = text.to_string();
        let mut entries: Vec<(&String, &String)> = reverse_map.iter().collect();
        entries.sort_by_key(|(k, _)| Reverse(k.len()));
        for (replacement, original) in entries {
            if out.contains(replacement.as_str()) {
                out = out.replace(replacement.as_str(), original.as_str());
            }
        }
        self.decode_remaining_brackets(&out)
    }

    fn decode_remaining_brackets(&self, text: &str) -> String {
        static BRACKET: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
        let re = BRACKET.get_or_init(|| {
            regex::Regex::new(r"\[([A-Za-z]+)-([A-Za-z0-9_-]{20,})\]").expect("static regex")
        });
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in re.captures_iter(text) {
            let m = caps.get(0).unwrap();
            out.push_str(&text[last..m.start()]);
            let bucket = caps.get(1).unwrap().as_str();
            let token = caps.get(2).unwrap().as_str();
            match crypto::decode_token(&self.key, bucket, token) {
                Some(plain) => out.push_str(&plain),
                None => out.push_str(m.as_str()),
            }
            last = m.end();
        }
        out.push_str(&text[last..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymize_then_deanonymize_round_trips() {
        let registry = GuardrailRegistry::new([9u8; 32]);
        let mut map = HashMap::new();
        let (anonymized, count) =
            registry.anonymize("contact me at alice@example.com or 123-45-6789", &mut map);
        assert!(count >= 2);
        assert!(!anonymized.contains("alice@example.com"));
        assert!(!anonymized.contains("123-45-6789"));
        let restored = registry.deanonymize(&anonymized, &map);
        assert!(restored.contains("alice@example.com"));
        assert!(restored.contains("123-45-6789"));
    }

    #[test]
    fn reanonymizing_output_does_not_double_wrap() {
        let registry = GuardrailRegistry::new([9u8; 32]);
        let mut map = HashMap::new();
        let (anonymized, _) = registry.anonymize("ssn 123-45-6789", &mut map);
        let (reanonymized, count2) = registry.anonymize(&anonymized, &mut HashMap::new());
        assert_eq!(reanonymized, anonymized);
        assert_eq!(count2, 0);
    }

    #[test]
    fn decode_fallback_recovers_token_without_reverse_map() {
        let registry = GuardrailRegistry::new([9u8; 32]);
        let token = crypto::encode_token(&[9u8; 32], "SSN", "123-45-6789");
        let wrapped = format!("ssn on file: [SSN-{token}]");
        let restored = registry.deanonymize(&wrapped, &HashMap::new());
        assert_eq!(restored, "ssn on file: 123-45-6789");
    }
}
