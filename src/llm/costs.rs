//! Per-model pricing.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Price per million tokens: (model prefix, input, output).
///
/// Longest-prefix match wins; unknown models cost zero rather than failing
/// the call.
const PRICES: &[(&str, Decimal, Decimal)] = &[
    ("claude-opus", dec!(15.00), dec!(75.00)),
    ("claude-sonnet", dec!(3.00), dec!(15.00)),
    ("claude-3-5-haiku", dec!(0.80), dec!(4.00)),
    ("claude-haiku", dec!(0.80), dec!(4.00)),
    ("gpt-4o-mini", dec!(0.15), dec!(0.60)),
    ("gpt-4o", dec!(2.50), dec!(10.00)),
    ("gpt-4.1-mini", dec!(0.40), dec!(1.60)),
    ("gpt-4.1", dec!(2.00), dec!(8.00)),
];

const MILLION: Decimal = dec!(1000000);

/// Cost of a completion in USD.
pub fn completion_cost(model: &str, input_tokens: u64, output_tokens: u64) -> Decimal {
    let Some((_, input_price, output_price)) = PRICES
        .iter()
        .filter(|(prefix, _, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _, _)| prefix.len())
    else {
        return Decimal::ZERO;
    };

    (Decimal::from(input_tokens) * input_price + Decimal::from(output_tokens) * output_price)
        / MILLION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sonnet_pricing() {
        let cost = completion_cost("claude-sonnet-4-20250514", 1_000_000, 0);
        assert_eq!(cost, dec!(3.00));
    }

    #[test]
    fn longest_prefix_wins() {
        // gpt-4o-mini must not be priced as gpt-4o.
        let mini = completion_cost("gpt-4o-mini", 0, 1_000_000);
        assert_eq!(mini, dec!(0.60));
        let full = completion_cost("gpt-4o", 0, 1_000_000);
        assert_eq!(full, dec!(10.00));
    }

    #[test]
    fn unknown_model_is_free() {
        assert_eq!(completion_cost("made-up-model", 500, 500), Decimal::ZERO);
    }

    #[test]
    fn mixed_tokens() {
        let cost = completion_cost("claude-sonnet-4-20250514", 1000, 1000);
        assert_eq!(cost, dec!(0.018));
    }
}
