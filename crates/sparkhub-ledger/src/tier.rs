use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Points credited for a verified top-up. Larger transfers earn a small
/// bonus rate; below the lowest tier the fiat amount converts one to one.
/// The result is floored, so the bonus never rounds up.
pub fn credited_points(amount: Decimal) -> i64 {
    let rate = if amount >= Decimal::from(1_000) {
        Decimal::new(105, 2)
    } else if amount >= Decimal::from(500) {
        Decimal::new(104, 2)
    } else if amount >= Decimal::from(100) {
        Decimal::new(103, 2)
    } else {
        Decimal::ONE
    };
    // Amounts are validated against a hard maximum before they get here, so
    // the conversion cannot overflow in practice.
    (amount * rate).floor().to_i64().unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use rust_decimal::Decimal;
    use speculoos::prelude::*;

    use super::credited_points;

    #[rstest]
    #[case("1", 1)]
    #[case("99", 99)]
    #[case("99.90", 99)]
    #[case("100", 103)]
    #[case("250", 257)]
    #[case("250.75", 258)]
    #[case("499", 513)]
    #[case("500", 520)]
    #[case("999", 1038)]
    #[case("1000", 1050)]
    #[case("2000", 2100)]
    fn tier_boundaries(#[case] amount: &str, #[case] expected: i64) {
        let amount: Decimal = amount.parse().unwrap();
        assert_that!(credited_points(amount)).is_equal_to(expected);
    }
}
