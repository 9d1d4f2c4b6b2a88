//! Query hashing and cost estimation.

use sha2::{Digest, Sha256};

use crate::models::TokenUsage;

/// Content hash of a query: SHA-256 hex of the lower-cased, trimmed text.
///
/// Used as the cache key so that `"Rust "` and `"rust"` share an entry.
pub fn hash_query(text: &str) -> String {
    let normalized = text.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// USD price per million tokens as `(input, output)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_m: f64,
    pub output_per_m: f64,
}

const PRICE_TABLE: [(&str, Pricing); 3] = [
    (
        "opus",
        Pricing {
            input_per_m: 15.0,
            output_per_m: 75.0,
        },
    ),
    (
        "sonnet",
        Pricing {
            input_per_m: 3.0,
            output_per_m: 15.0,
        },
    ),
    (
        "haiku",
        Pricing {
            input_per_m: 1.0,
            output_per_m: 5.0,
        },
    ),
];

/// Look up pricing by model family; unknown models use the cheapest tier.
pub fn pricing_for(model: &str) -> Pricing {
    let lower = model.to_lowercase();
    PRICE_TABLE
        .iter()
        .find(|(family, _)| lower.contains(family))
        .map(|(_, p)| *p)
        .unwrap_or(PRICE_TABLE[2].1)
}

/// Estimated USD cost of a request.
pub fn estimate_cost(model: &str, usage: TokenUsage) -> f64 {
    let p = pricing_for(model);
    (usage.input_tokens as f64 * p.input_per_m + usage.output_tokens as f64 * p.output_per_m)
        / 1_000_000.0
}
