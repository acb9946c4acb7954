//! Per-token pricing for known models (USD).

use rust_decimal::Decimal;

/// Price per million tokens, (input, output), expressed in whole cents.
const PRICES_PER_MILLION_CENTS: &[(&str, i64, i64)] = &[
    ("claude-opus-4", 1500, 7500),
    ("claude-sonnet-4", 300, 1500),
    ("claude-3-7-sonnet", 300, 1500),
    ("claude-3-5-sonnet", 300, 1500),
    ("claude-3-5-haiku", 80, 400),
    ("gpt-4o-mini", 15, 60),
    ("gpt-4o", 250, 1000),
    ("gpt-4.1-mini", 40, 160),
    ("gpt-4.1", 200, 800),
];

/// Fallback for unknown models (Sonnet pricing).
const DEFAULT_CENTS: (i64, i64) = (300, 1500);

/// Look up (input, output) cost per token for `model`.
///
/// Matching is by prefix so dated snapshots (`claude-sonnet-4-20250514`)
/// resolve to their family. Longer prefixes are listed first.
pub fn model_cost(model: &str) -> (Decimal, Decimal) {
    let (input, output) = PRICES_PER_MILLION_CENTS
        .iter()
        .find(|(prefix, _, _)| model.starts_with(prefix))
        .map(|(_, i, o)| (*i, *o))
        .unwrap_or(DEFAULT_CENTS);

    // cents per million tokens → dollars per token: scale 10^8
    (Decimal::new(input, 8), Decimal::new(output, 8))
}
