//! Cost accounting from token usage and model pricing.
//!
//! Prices are kept in nanodollars per token (1 USD = 1_000_000_000
//! nanodollars) to avoid floating-point rounding in accumulation; the public
//! accessors convert to dollars.

use serde::{Deserialize, Serialize};

/// Model pricing in nanodollars per token.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    /// Cost per prompt token in nanodollars
    pub input_nano_per_token: u64,
    /// Cost per completion token in nanodollars
    pub output_nano_per_token: u64,
}

/// Token usage from a single provider call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Create a usage object ensuring `total_tokens` is consistent.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    pub fn has_usage(&self) -> bool {
        self.prompt_tokens > 0 || self.completion_tokens > 0
    }
}

/// Normalize model names to canonical form for pricing lookup.
fn normalize_model(model: &str) -> &str {
    let trimmed = model.trim();
    match trimmed {
        s if s.contains("claude-sonnet-4") || s.contains("claude-4-sonnet") => "claude-sonnet-4",
        s if s.contains("claude-opus-4") || s.contains("claude-4-opus") => "claude-opus-4",
        s if s.contains("claude-3-5-haiku") || s.contains("claude-3.5-haiku") => "claude-3-5-haiku",
        s if s.contains("gpt-4o-mini") => "gpt-4o-mini",
        s if s.contains("gpt-4o") => "gpt-4o",
        s if s.contains("gpt-4.1") => "gpt-4.1",
        s if s.contains("o4-mini") => "o4-mini",
        s if s.contains("gemini-2.5-pro") => "gemini-2.5-pro",
        s if s.contains("gemini-2.5-flash") => "gemini-2.5-flash",
        s if s.contains("deepseek-chat") || s.contains("deepseek-v3") => "deepseek-chat",
        s if s.contains("deepseek-r") => "deepseek-reasoner",
        _ => trimmed,
    }
}

/// Get pricing for a model. Returns None if the model is unknown.
///
/// Formula: $X per 1M tokens = X * 1000 nanodollars per token.
pub fn pricing_for_model(model: &str) -> Option<ModelPricing> {
    let pricing = match normalize_model(model) {
        // Claude Sonnet 4: $3/1M input, $15/1M output
        "claude-sonnet-4" => ModelPricing {
            input_nano_per_token: 3_000,
            output_nano_per_token: 15_000,
        },
        // Claude Opus 4: $15/1M input, $75/1M output
        "claude-opus-4" => ModelPricing {
            input_nano_per_token: 15_000,
            output_nano_per_token: 75_000,
        },
        // Claude 3.5 Haiku: $0.80/1M input, $4/1M output
        "claude-3-5-haiku" => ModelPricing {
            input_nano_per_token: 800,
            output_nano_per_token: 4_000,
        },
        // GPT-4o: $2.50/1M input, $10/1M output
        "gpt-4o" => ModelPricing {
            input_nano_per_token: 2_500,
            output_nano_per_token: 10_000,
        },
        // GPT-4o-mini: $0.15/1M input, $0.60/1M output
        "gpt-4o-mini" => ModelPricing {
            input_nano_per_token: 150,
            output_nano_per_token: 600,
        },
        // GPT-4.1: $2/1M input, $8/1M output
        "gpt-4.1" => ModelPricing {
            input_nano_per_token: 2_000,
            output_nano_per_token: 8_000,
        },
        // o4-mini: $1.10/1M input, $4.40/1M output
        "o4-mini" => ModelPricing {
            input_nano_per_token: 1_100,
            output_nano_per_token: 4_400,
        },
        // Gemini 2.5 Pro: $1.25/1M input, $10/1M output
        "gemini-2.5-pro" => ModelPricing {
            input_nano_per_token: 1_250,
            output_nano_per_token: 10_000,
        },
        // Gemini 2.5 Flash: $0.15/1M input, $0.60/1M output
        "gemini-2.5-flash" => ModelPricing {
            input_nano_per_token: 150,
            output_nano_per_token: 600,
        },
        // DeepSeek chat: $0.27/1M input, $1.10/1M output
        "deepseek-chat" => ModelPricing {
            input_nano_per_token: 270,
            output_nano_per_token: 1_100,
        },
        // DeepSeek reasoner: $0.55/1M input, $2.19/1M output
        "deepseek-reasoner" => ModelPricing {
            input_nano_per_token: 550,
            output_nano_per_token: 2_190,
        },
        _ => return None,
    };
    Some(pricing)
}

/// Cumulative cost record per provider, updated exactly once per call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CostRecord {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    total_cost_nano: u64,
    last_call_cost_nano: u64,
}

impl CostRecord {
    /// Record the usage of one provider call.
    ///
    /// Unknown models cost zero and log a warning.
    pub fn add_usage(&mut self, model: &str, usage: &TokenUsage) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total_tokens;

        let call_cost = match pricing_for_model(model) {
            Some(pricing) => usage
                .prompt_tokens
                .saturating_mul(pricing.input_nano_per_token)
                .saturating_add(
                    usage
                        .completion_tokens
                        .saturating_mul(pricing.output_nano_per_token),
                ),
            None => {
                if usage.has_usage() {
                    tracing::warn!(model = %model, "unknown model for cost calculation, using 0 cost");
                }
                0
            }
        };
        self.last_call_cost_nano = call_cost;
        self.total_cost_nano = self.total_cost_nano.saturating_add(call_cost);
    }

    /// Accumulated cost in dollars.
    pub fn total_cost(&self) -> f64 {
        self.total_cost_nano as f64 / 1e9
    }

    /// Cost of the most recent call in dollars.
    pub fn last_call_cost(&self) -> f64 {
        self.last_call_cost_nano as f64 / 1e9
    }

    /// Merge another record into this one (e.g. across providers).
    pub fn merge(&mut self, other: &CostRecord) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.total_cost_nano = self.total_cost_nano.saturating_add(other.total_cost_nano);
        self.last_call_cost_nano = other.last_call_cost_nano;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_model() {
        assert_eq!(normalize_model("claude-sonnet-4-20250514"), "claude-sonnet-4");
        assert_eq!(normalize_model("gpt-4o-2024-08-06"), "gpt-4o");
        assert_eq!(normalize_model("gemini-2.5-pro-preview"), "gemini-2.5-pro");
    }

    #[test]
    fn test_pricing_lookup() {
        assert!(pricing_for_model("claude-sonnet-4").is_some());
        assert!(pricing_for_model("gpt-4o").is_some());
        assert!(pricing_for_model("unknown-model-xyz").is_none());
    }

    #[test]
    fn test_cost_accumulation() {
        let mut record = CostRecord::default();
        // Claude Sonnet 4: 1000 * 3000 + 500 * 15000 = 10_500_000 nano = $0.0105
        record.add_usage("claude-sonnet-4", &TokenUsage::new(1000, 500));
        assert_eq!(record.total_tokens, 1500);
        assert!((record.total_cost() - 0.0105).abs() < 1e-9);
        assert!((record.last_call_cost() - 0.0105).abs() < 1e-9);

        record.add_usage("claude-sonnet-4", &TokenUsage::new(1000, 0));
        assert!((record.total_cost() - 0.0135).abs() < 1e-9);
        assert!((record.last_call_cost() - 0.003).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_costs_zero() {
        let mut record = CostRecord::default();
        record.add_usage("completely-unknown", &TokenUsage::new(1000, 500));
        assert_eq!(record.total_cost(), 0.0);
        assert_eq!(record.total_tokens, 1500);
    }
}
