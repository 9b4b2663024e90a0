//! A small per-model rate table for the `cost_usd` field in usage records
//! (spec §4.8 step 10: "cost_usd via a small rate table").

/// Dollars per million input/output tokens.
#[derive(Debug, Clone, Copy)]
pub struct RateCard {
    pub prompt_per_million: f64,
    pub completion_per_million: f64,
}

impl RateCard {
    pub fn cost_usd(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = input_tokens as f64 * self.prompt_per_million / 1_000_000.0;
        let output_cost = output_tokens as f64 * self.completion_per_million / 1_000_000.0;
        input_cost + output_cost
    }
}

/// Static rate table, exact match then prefix match (mirrors
/// `ModelLimitsTable::lookup`). Unknown models cost `$0` — the rate table is
/// advisory, not a hard billing source of truth.
#[derive(Clone)]
pub struct RateTable {
    entries: Vec<(&'static str, RateCard)>,
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            entries: vec![
                (
                    "claude-opus-4",
                    RateCard {
                        prompt_per_million: 15.0,
                        completion_per_million: 75.0,
                    },
                ),
                (
                    "claude-sonnet-4",
                    RateCard {
                        prompt_per_million: 3.0,
                        completion_per_million: 15.0,
                    },
                ),
                (
                    "claude-haiku",
                    RateCard {
                        prompt_per_million: 0.8,
                        completion_per_million: 4.0,
                    },
                ),
                (
                    "gpt-4o-mini",
                    RateCard {
                        prompt_per_million: 0.15,
                        completion_per_million: 0.6,
                    },
                ),
                (
                    "gpt-4o",
                    RateCard {
                        prompt_per_million: 2.5,
                        completion_per_million: 10.0,
                    },
                ),
                (
                    "deepseek-reasoner",
                    RateCard {
                        prompt_per_million: 0.55,
                        completion_per_million: 2.19,
                    },
                ),
                (
                    "deepseek-chat",
                    RateCard {
                        prompt_per_million: 0.27,
                        completion_per_million: 1.1,
                    },
                ),
            ],
        }
    }
}

impl RateTable {
    pub fn lookup(&self, model_id: &str) -> Option<RateCard> {
        if let Some((_, card)) = self.entries.iter().find(|(key, _)| *key == model_id) {
            return Some(*card);
        }
        self.entries
            .iter()
            .find(|(key, _)| model_id.starts_with(key) || key.starts_with(model_id))
            .map(|(_, card)| *card)
    }

    /// Compute `cost_usd` for a completed request; `0.0` if the model isn't
    /// in the table.
    pub fn cost_usd(&self, model_id: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.lookup(model_id)
            .map(|c| c.cost_usd(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_computes_nonzero_cost() {
        let table = RateTable::default();
        let cost = table.cost_usd("claude-sonnet-4-20250514", 1_000_000, 1_000_000);
        assert!((cost - 18.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_costs_zero() {
        let table = RateTable::default();
        assert_eq!(table.cost_usd("totally-unknown", 1000, 1000), 0.0);
    }
}
