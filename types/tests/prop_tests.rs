use proptest::prelude::*;

use tessera_types::Amount;

proptest! {
    /// Display output parses back to the same amount.
    #[test]
    fn display_parse_roundtrip(raw in 0u128..1_000_000_000_000_000_000) {
        let amount = Amount::from_raw(raw);
        let parsed: Amount = amount.to_string().parse().unwrap();
        prop_assert_eq!(parsed, amount);
    }

    /// Summation is order independent.
    #[test]
    fn sum_is_commutative(a in 0u128..u64::MAX as u128, b in 0u128..u64::MAX as u128) {
        let x = Amount::from_raw(a);
        let y = Amount::from_raw(b);
        prop_assert_eq!(x + y, y + x);
    }

    /// Wire values with at most eight decimals survive the f64 conversion.
    #[test]
    fn f64_conversion_preserves_cents(units in 0u64..1_000_000, cents in 0u64..100) {
        let value = units as f64 + cents as f64 / 100.0;
        let amount = Amount::from_f64(value).unwrap();
        prop_assert_eq!(amount.raw(), units as u128 * 100_000_000 + cents as u128 * 1_000_000);
    }
}
