//! Fixed-point amounts.
//!
//! Every monetary field of a fiscal document is carried as a `rust_decimal`
//! value rescaled to a fixed number of fractional digits. Floating point is
//! never used: the authority rejects totals that drift from the summed item
//! values by a single hundredth.

use core::iter::Sum;
use core::ops::{Add, AddAssign};
use core::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of reading a lenient numeric field.
///
/// `coerced` is set when the input was present but not numeric and the value
/// fell back to zero. Absent fields are zero without being flagged.
/// `out_of_range` is set when the input has more integer digits than the
/// authority layout allows; the value is then zero and must not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coerced<T> {
    pub value: T,
    pub coerced: bool,
    pub out_of_range: bool,
}

macro_rules! fixed_point {
    ($(#[$meta:meta])* $t:ident, $scale:expr, $digits:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(from = "Decimal", into = "Decimal")]
        pub struct $t(Decimal);

        impl $t {
            /// Fractional digits carried by this type.
            pub const SCALE: u32 = $scale;

            /// Integer digits allowed by the authority layout.
            pub const INTEGER_DIGITS: u32 = $digits;

            pub const ZERO: Self = Self(Decimal::ZERO);

            /// Round half away from zero to the fixed scale.
            pub fn from_decimal(value: Decimal) -> Self {
                let mut d = value.round_dp_with_strategy(Self::SCALE, RoundingStrategy::MidpointAwayFromZero);
                d.rescale(Self::SCALE);
                Self(d)
            }

            /// Parse a plain decimal literal (`"10.5"`, `"-3"`).
            pub fn parse(s: &str) -> Option<Self> {
                Decimal::from_str(s.trim()).ok().map(Self::from_decimal)
            }

            /// `value` at the fixed scale, if it fits the integer digits.
            pub fn bounded(value: Decimal) -> Option<Self> {
                let limit = Decimal::from(10u64.pow(Self::INTEGER_DIGITS));
                if value.abs() >= limit {
                    return None;
                }
                Some(Self::from_decimal(value)).filter(|v| v.0.abs() < limit)
            }

            /// Read a lenient JSON field: numbers and numeric strings are
            /// accepted, anything else present becomes zero and is flagged.
            pub fn coerce(value: Option<&Value>) -> Coerced<Self> {
                let (value, coerced, out_of_range) = match lenient_decimal(value) {
                    Ok(Some(d)) => match Self::bounded(d) {
                        Some(v) => (v, false, false),
                        None => (Self::ZERO, false, true),
                    },
                    Ok(None) => (Self::ZERO, false, false),
                    Err(()) => (Self::ZERO, true, false),
                };
                Coerced { value, coerced, out_of_range }
            }

            pub fn is_zero(&self) -> bool {
                self.0.is_zero()
            }

            pub fn is_positive(&self) -> bool {
                self.0 > Decimal::ZERO
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{:.*}", Self::SCALE as usize, self.0)
            }
        }

        impl From<Decimal> for $t {
            fn from(value: Decimal) -> Self {
                Self::from_decimal(value)
            }
        }

        impl From<$t> for Decimal {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        // Operands read through `coerce` are bounded, so document sums stay
        // far below the decimal range.
        impl Add for $t {
            type Output = Self;

            fn add(self, rhs: Self) -> Self {
                Self::from_decimal(self.0 + rhs.0)
            }
        }

        impl AddAssign for $t {
            fn add_assign(&mut self, rhs: Self) {
                *self = *self + rhs;
            }
        }

        impl Sum for $t {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                iter.fold(Self::ZERO, Add::add)
            }
        }

        impl<'a> Sum<&'a $t> for $t {
            fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
                iter.copied().sum()
            }
        }
    };
}

fixed_point!(
    /// Currency amount with exactly two fractional digits.
    Money,
    2,
    13
);

fixed_point!(
    /// Commercial/taxable quantity (four fractional digits).
    Quantity,
    4,
    11
);

fixed_point!(
    /// Tax rate in percent (four fractional digits).
    Rate,
    4,
    3
);

fixed_point!(
    /// Unit price (ten fractional digits, as allowed for `vUnCom`).
    UnitValue,
    10,
    11
);

/// `Ok(None)` for absent/null, `Err(())` for present but not numeric.
fn lenient_decimal(value: Option<&Value>) -> Result<Option<Decimal>, ()> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .map(Some)
                .map_err(|_| ())
        }
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Decimal::from_str(s.trim()).map(Some).map_err(|_| ()),
        Some(_) => Err(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn money_always_has_two_fractional_digits() {
        assert_eq!(Money::parse("10").unwrap().to_string(), "10.00");
        assert_eq!(Money::parse("10.5").unwrap().to_string(), "10.50");
        assert_eq!(Money::parse("0.005").unwrap().to_string(), "0.01");
        assert_eq!(Money::parse("-0.005").unwrap().to_string(), "-0.01");
    }

    #[test]
    fn point_one_plus_point_two_is_exact() {
        let a = Money::coerce(Some(&json!(0.1))).value;
        let b = Money::coerce(Some(&json!(0.2))).value;
        assert_eq!(a + b, Money::parse("0.3").unwrap());
    }

    #[test]
    fn coerce_flags_non_numeric_input() {
        let c = Money::coerce(Some(&json!("abc")));
        assert_eq!(c.value, Money::ZERO);
        assert!(c.coerced);

        let c = Money::coerce(Some(&json!({"nested": 1})));
        assert!(c.coerced);

        let c = Money::coerce(None);
        assert_eq!(c.value, Money::ZERO);
        assert!(!c.coerced);

        let c = Money::coerce(Some(&json!(" 12.345 ")));
        assert_eq!(c.value.to_string(), "12.35");
        assert!(!c.coerced);
    }

    #[test]
    fn amounts_beyond_the_layout_are_out_of_range() {
        let c = Money::coerce(Some(&json!("79228162514264337593543950335")));
        assert_eq!(c.value, Money::ZERO);
        assert!(c.out_of_range);
        assert!(!c.coerced);

        assert!(Money::coerce(Some(&json!("10000000000000"))).out_of_range);
        assert!(Money::coerce(Some(&json!("-10000000000000.00"))).out_of_range);
        // Rounds up onto the limit.
        assert!(Money::coerce(Some(&json!("9999999999999.999"))).out_of_range);

        let max = Money::coerce(Some(&json!("9999999999999.99")));
        assert!(!max.out_of_range);
        assert_eq!(max.value.to_string(), "9999999999999.99");
        assert!(Rate::coerce(Some(&json!(1000))).out_of_range);
        assert!(!Rate::coerce(Some(&json!(100))).out_of_range);
    }

    #[test]
    fn money_serializes_with_fixed_scale() {
        let m = Money::parse("7.1").unwrap();
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, "\"7.10\"");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: summing cent amounts as `Money` equals summing the integer
        /// cents, at any item count.
        #[test]
        fn sum_matches_integer_cents(cents in prop::collection::vec(0i64..10_000_000i64, 0..1200)) {
            let total: Money = cents.iter().map(|c| Money::from_decimal(Decimal::new(*c, 2))).sum();
            let expected: i64 = cents.iter().sum();
            prop_assert_eq!(total, Money::from_decimal(Decimal::new(expected, 2)));
        }
    }
}
