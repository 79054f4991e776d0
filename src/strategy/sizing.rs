//! Order sizing and rounding against exchange constraints.
//!
//! Sub-minimum sizes are an expected, frequent outcome of splitting capital
//! across many envelope levels and pairs, so `round_size` rejects them by
//! returning `None` rather than erroring.

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use crate::exchange::MarketInfo;

/// Truncate `raw_amount` to the pair's amount precision and enforce the
/// exchange minimum. Returns `None` for sub-minimum or non-positive results;
/// exactly the minimum is accepted.
pub fn round_size(raw_amount: Decimal, market: &MarketInfo) -> Option<Decimal> {
    let sized = raw_amount
        .round_dp_with_strategy(market.amount_precision, RoundingStrategy::ToZero);

    if sized < market.min_amount || sized <= Decimal::ZERO {
        debug!(%raw_amount, %sized, min = %market.min_amount, "Skipping sub-minimum order size");
        return None;
    }
    Some(sized)
}

/// Round `raw_price` to the pair's price precision. Prices have no minimum,
/// so this never rejects.
pub fn round_price(raw_price: Decimal, market: &MarketInfo) -> Decimal {
    raw_price
        .round_dp_with_strategy(market.price_precision, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market(min_amount: Decimal, amount_precision: u32, price_precision: u32) -> MarketInfo {
        MarketInfo {
            min_amount,
            amount_precision,
            price_precision,
        }
    }

    #[test]
    fn test_truncates_to_amount_precision() {
        let m = market(dec!(0.1), 2, 4);
        assert_eq!(round_size(dec!(1.23999), &m), Some(dec!(1.23)));
    }

    #[test]
    fn test_rejects_below_minimum() {
        let m = market(dec!(1), 2, 4);
        assert_eq!(round_size(dec!(0.99), &m), None);
    }

    #[test]
    fn test_exactly_minimum_is_accepted() {
        let m = market(dec!(0.1), 1, 4);
        // Truncation lands exactly on the minimum: accepted, not rejected
        assert_eq!(round_size(dec!(0.105), &m), Some(dec!(0.1)));
        assert_eq!(round_size(dec!(0.1), &m), Some(dec!(0.1)));
    }

    #[test]
    fn test_truncation_can_push_below_minimum() {
        let m = market(dec!(0.1), 0, 4);
        // 0.9 truncates to 0, below the 0.1 minimum
        assert_eq!(round_size(dec!(0.9), &m), None);
    }

    #[test]
    fn test_rejects_zero_and_negative() {
        let m = market(dec!(0), 2, 4);
        assert_eq!(round_size(dec!(0), &m), None);
        assert_eq!(round_size(dec!(-1), &m), None);
    }

    #[test]
    fn test_round_price_has_no_minimum() {
        let m = market(dec!(100), 2, 2);
        assert_eq!(round_price(dec!(0.00004), &m), dec!(0));
        assert_eq!(round_price(dec!(1234.5678), &m), dec!(1234.57));
    }

    #[test]
    fn test_round_price_midpoint() {
        let m = market(dec!(0.1), 2, 1);
        assert_eq!(round_price(dec!(1.25), &m), dec!(1.3));
    }
}
