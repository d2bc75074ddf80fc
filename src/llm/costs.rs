//! Model pricing, USD per token.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// (input, output) cost per token for an Anthropic model id.
pub(crate) fn model_cost(model: &str) -> (Decimal, Decimal) {
    // USD per million tokens, by model family.
    let (input, output) = if model.contains("opus") {
        (dec!(15), dec!(75))
    } else if model.contains("haiku") {
        (dec!(0.80), dec!(4))
    } else {
        (dec!(3), dec!(15))
    };
    let million = dec!(1000000);
    (input / million, output / million)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sonnet_is_the_default_tier() {
        let (input, output) = model_cost("claude-sonnet-4-20250514");
        assert_eq!(input * dec!(1000000), dec!(3));
        assert_eq!(output * dec!(1000000), dec!(15));
        assert_eq!(model_cost("some-future-model"), model_cost("claude-sonnet-4"));
    }

    #[test]
    fn family_tiers() {
        assert_eq!(model_cost("claude-opus-4-1").1 * dec!(1000000), dec!(75));
        assert_eq!(model_cost("claude-3-5-haiku-latest").0 * dec!(1000000), dec!(0.80));
    }
}
