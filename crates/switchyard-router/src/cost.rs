//! Cost accounting
//!
//! `cost = input/1000 * price_in + output/1000 * price_out * weight`
//!
//! The output weight defaults to 3, which reproduces the long-standing
//! pricing of the built-in catalogue where a single per-1K price is stored.
//! Set it to 1 when descriptors carry real per-direction prices.

use crate::registry::Pricing;
use crate::response::TokenUsage;

/// Default multiplier applied to the output price
pub const DEFAULT_OUTPUT_WEIGHT: f64 = 3.0;

/// Computes the monetary cost of a call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostAccountant {
    output_weight: f64,
}

impl Default for CostAccountant {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_WEIGHT)
    }
}

impl CostAccountant {
    /// Accountant with a custom output weight (negative values are clamped to 0)
    #[must_use]
    pub fn new(output_weight: f64) -> Self {
        Self {
            output_weight: output_weight.max(0.0),
        }
    }

    /// Output weight in use
    #[must_use]
    pub fn output_weight(&self) -> f64 {
        self.output_weight
    }

    /// Cost in USD of `usage` under `pricing`
    #[must_use]
    pub fn compute(&self, usage: &TokenUsage, pricing: &Pricing) -> f64 {
        self.estimate(usage.input_tokens, usage.output_tokens, pricing)
    }

    /// Cost in USD for raw token counts
    #[must_use]
    pub fn estimate(&self, input_tokens: u32, output_tokens: u32, pricing: &Pricing) -> f64 {
        let input = f64::from(input_tokens) / 1000.0 * pricing.input_per_1k.max(0.0);
        let output = f64::from(output_tokens) / 1000.0
            * pricing.output_per_1k.max(0.0)
            * self.output_weight;
        input + output
    }
}
