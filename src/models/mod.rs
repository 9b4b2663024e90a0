//! Model/tier mapper and output-token clamp (spec §4.5).

pub mod pricing;

use std::sync::OnceLock;

use regex::Regex;

use crate::store::types::Tier;

fn tier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(opus|sonnet|haiku)").expect("static regex"))
}

/// Detect the coarse capability/price tier from a client-requested model
/// name. Returns `None` for non-Claude model names (spec §3 "Tier").
pub fn detect_tier(model: &str) -> Option<Tier> {
    let caps = tier_regex().captures(model)?;
    match caps.get(1)?.as_str().to_ascii_lowercase().as_str() {
        "opus" => Some(Tier::Opus),
        "sonnet" => Some(Tier::Sonnet),
        "haiku" => Some(Tier::Haiku),
        _ => None,
    }
}

/// Per-model limits consulted by `clamp_max_tokens`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelLimits {
    pub max_output_tokens: Option<u32>,
    pub supports_tool_calling: bool,
    pub supports_reasoning: bool,
}

/// A small, process-static table of well-known model limits. Exact match
/// first, then bidirectional prefix match (spec §4.5), so a caller can pass
/// a dated suffix (`claude-opus-4-20250514`) or a bare alias (`claude-opus-4`)
/// and still find an entry.
pub struct ModelLimitsTable {
    entries: Vec<(&'static str, ModelLimits)>,
}

impl Default for ModelLimitsTable {
    fn default() -> Self {
        Self {
            entries: vec![
                (
                    "claude-opus-4",
                    ModelLimits {
                        max_output_tokens: Some(32_000),
                        supports_tool_calling: true,
                        supports_reasoning: true,
                    },
                ),
                (
                    "claude-sonnet-4",
                    ModelLimits {
                        max_output_tokens: Some(64_000),
                        supports_tool_calling: true,
                        supports_reasoning: true,
                    },
                ),
                (
                    "claude-haiku",
                    ModelLimits {
                        max_output_tokens: Some(8_192),
                        supports_tool_calling: true,
                        supports_reasoning: false,
                    },
                ),
                (
                    "gpt-4o",
                    ModelLimits {
                        max_output_tokens: Some(16_384),
                        supports_tool_calling: true,
                        supports_reasoning: false,
                    },
                ),
                (
                    "gpt-4o-mini",
                    ModelLimits {
                        max_output_tokens: Some(16_384),
                        supports_tool_calling: true,
                        supports_reasoning: false,
                    },
                ),
                (
                    "o1",
                    ModelLimits {
                        max_output_tokens: Some(100_000),
                        supports_tool_calling: false,
                        supports_reasoning: true,
                    },
                ),
                (
                    "deepseek-reasoner",
                    ModelLimits {
                        max_output_tokens: Some(64_000),
                        supports_tool_calling: true,
                        supports_reasoning: true,
                    },
                ),
                (
                    "deepseek-chat",
                    ModelLimits {
                        max_output_tokens: Some(8_192),
                        supports_tool_calling: true,
                        supports_reasoning: false,
                    },
                ),
            ],
        }
    }
}

impl ModelLimitsTable {
    /// Look up limits for `model_id`: exact match, else the first entry that
    /// is a prefix of `model_id` or vice versa.
    pub fn lookup(&self, model_id: &str) -> Option<ModelLimits> {
        if let Some((_, limits)) = self.entries.iter().find(|(key, _)| *key == model_id) {
            return Some(*limits);
        }
        self.entries
            .iter()
            .find(|(key, _)| model_id.starts_with(key) || key.starts_with(model_id))
            .map(|(_, limits)| *limits)
    }

    /// Clamp `value` to the model's configured `max_output_tokens`, if any;
    /// otherwise return `value` unchanged (spec §4.5).
    pub fn clamp_max_tokens(&self, value: u32, model_id: &str) -> u32 {
        match self.lookup(model_id).and_then(|l| l.max_output_tokens) {
            Some(max) => value.min(max),
            None => value,
        }
    }
}

static DEEPSEEK_REASONER_RE: OnceLock<Regex> = OnceLock::new();

/// Whether `model` targets a DeepSeek reasoner model (spec §4.4, the
/// `reasoning_content` special case).
pub fn is_deepseek_reasoner(model: &str) -> bool {
    DEEPSEEK_REASONER_RE
        .get_or_init(|| Regex::new(r"(?i)deepseek-reasoner|deepseek-r1").expect("static regex"))
        .is_match(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_tiers_case_insensitively() {
        assert_eq!(detect_tier("claude-OPUS-4-20250514"), Some(Tier::Opus));
        assert_eq!(detect_tier("claude-sonnet-4-20250514"), Some(Tier::Sonnet));
        assert_eq!(detect_tier("claude-haiku-3-5"), Some(Tier::Haiku));
        assert_eq!(detect_tier("gpt-4o"), None);
    }

    #[test]
    fn clamp_uses_exact_then_prefix_match() {
        let table = ModelLimitsTable::default();
        assert_eq!(table.clamp_max_tokens(100_000, "claude-opus-4"), 32_000);
        assert_eq!(
            table.clamp_max_tokens(100_000, "claude-opus-4-20250514"),
            32_000
        );
        assert_eq!(table.clamp_max_tokens(1_000, "claude-opus-4"), 1_000);
        // Unknown model id: unchanged.
        assert_eq!(table.clamp_max_tokens(999_999, "some-unknown-model"), 999_999);
    }

    #[test]
    fn deepseek_reasoner_detection() {
        assert!(is_deepseek_reasoner("deepseek-reasoner"));
        assert!(is_deepseek_reasoner("DeepSeek-R1"));
        assert!(!is_deepseek_reasoner("deepseek-chat"));
    }
}
