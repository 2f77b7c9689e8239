use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// USD per million tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPrice {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_per_million
            + output_tokens as f64 * self.output_per_million)
            / 1_000_000.0
    }

    /// Batch jobs bill at half the synchronous rate.
    pub fn batch(&self) -> Self {
        Self::new(self.input_per_million / 2.0, self.output_per_million / 2.0)
    }
}

/// Unknown models are priced at the top tier so estimates err high.
const FALLBACK: ModelPrice = ModelPrice::new(15.0, 75.0);

const BUILT_IN: &[(&str, ModelPrice)] = &[
    ("claude-opus-4", ModelPrice::new(15.0, 75.0)),
    ("claude-sonnet-4", ModelPrice::new(3.0, 15.0)),
    ("claude-3-7-sonnet", ModelPrice::new(3.0, 15.0)),
    ("claude-haiku-4-5", ModelPrice::new(0.8, 4.0)),
    ("claude-3-5-haiku", ModelPrice::new(0.8, 4.0)),
];

/// Per-model prices. Entries given in the configuration win over the
/// built-in list, which matches on model-name prefix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PricingTable(BTreeMap<String, ModelPrice>);

impl PricingTable {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, model: impl Into<String>, price: ModelPrice) {
        self.0.insert(model.into(), price);
    }

    pub fn price_for(&self, model: &str) -> ModelPrice {
        if let Some(price) = self.0.get(model) {
            return *price;
        }
        BUILT_IN
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix))
            .map(|(_, price)| *price)
            .unwrap_or(FALLBACK)
    }
}
