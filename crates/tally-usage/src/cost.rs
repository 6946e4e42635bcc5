//! Token cost computation against a rate.

use tally_core::usage::CostRate;

/// Cost in the rate's currency for the given token counts.
///
/// Rates are per 1 000 tokens; the result is unrounded (rounding is a
/// display concern).
pub fn calculate_cost(input_tokens: i64, output_tokens: i64, rate: &CostRate) -> f64 {
    let input_cost = (input_tokens as f64 / 1_000.0) * rate.input_token_rate;
    let output_cost = (output_tokens as f64 / 1_000.0) * rate.output_token_rate;
    input_cost + output_cost
}

/// Whether a freshly computed cost is materially different from the stored
/// one (beyond float noise).
pub fn cost_differs(computed: f64, stored: f64) -> bool {
    (computed - stored).abs() > 1e-9
}
