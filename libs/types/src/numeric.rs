//! Decimal usage quantities
//!
//! Uses rust_decimal so that repeated accumulation is exact: summing the
//! same observations in any order yields the same stored value.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ValueError;

/// Non-negative usage quantity (bytes, in the cellular deployment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct UsageValue(Decimal);

impl UsageValue {
    pub const ZERO: UsageValue = UsageValue(Decimal::ZERO);

    /// Wrap a decimal, rejecting negative quantities.
    pub fn new(value: Decimal) -> Result<Self, ValueError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(ValueError::Negative(value.to_string()));
        }
        Ok(Self(value.normalize()))
    }

    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Add an observed quantity to this running total.
    pub fn checked_add(self, added: UsageValue) -> Result<Self, ValueError> {
        self.0
            .checked_add(added.0)
            .map(|sum| Self(sum.normalize()))
            .ok_or_else(|| ValueError::Overflow {
                current: self.0.to_string(),
                added: added.0.to_string(),
            })
    }
}

impl TryFrom<Decimal> for UsageValue {
    type Error = ValueError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UsageValue> for Decimal {
    fn from(value: UsageValue) -> Decimal {
        value.0
    }
}

impl FromStr for UsageValue {
    type Err = ValueError;

    /// Accepts plain decimals (`1500`, `12.5`) and scientific notation
    /// (`1.5e3`), the shapes a float formatter emits. Numbers beyond
    /// `Decimal`'s 96-bit mantissa or 28 fractional digits (`1e30`,
    /// `1e-30`) are `OutOfRange`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parsed = match Decimal::from_str(s).or_else(|_| Decimal::from_scientific(s)) {
            Ok(parsed) => parsed,
            Err(_) => {
                return Err(match s.parse::<f64>() {
                    Ok(f) if f.is_finite() && f < 0.0 => ValueError::Negative(s.to_string()),
                    Ok(f) if f.is_finite() => ValueError::OutOfRange(s.to_string()),
                    _ => ValueError::NotANumber(s.to_string()),
                })
            }
        };
        Self::new(parsed)
    }
}

impl fmt::Display for UsageValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shapes() {
        assert_eq!("1500".parse::<UsageValue>().unwrap(), UsageValue::from_u64(1500));
        assert_eq!("1.5e3".parse::<UsageValue>().unwrap(), UsageValue::from_u64(1500));
        assert_eq!(
            "12.50".parse::<UsageValue>().unwrap().as_decimal(),
            Decimal::from_str_exact("12.5").unwrap()
        );
        assert_eq!("0".parse::<UsageValue>().unwrap(), UsageValue::ZERO);
    }

    #[test]
    fn test_parse_rejects() {
        assert!(matches!("abc".parse::<UsageValue>(), Err(ValueError::NotANumber(_))));
        assert!(matches!("NaN".parse::<UsageValue>(), Err(ValueError::NotANumber(_))));
        assert!(matches!("-3".parse::<UsageValue>(), Err(ValueError::Negative(_))));
        assert!("".parse::<UsageValue>().is_err());
    }

    #[test]
    fn test_out_of_range_is_distinct() {
        assert_eq!("1e30".parse::<UsageValue>(), Err(ValueError::OutOfRange("1e30".to_string())));
        assert_eq!("1e-30".parse::<UsageValue>(), Err(ValueError::OutOfRange("1e-30".to_string())));
        assert!(matches!("-1e30".parse::<UsageValue>(), Err(ValueError::Negative(_))));
        assert!(matches!("inf".parse::<UsageValue>(), Err(ValueError::NotANumber(_))));
        assert!(matches!("1e".parse::<UsageValue>(), Err(ValueError::NotANumber(_))));
    }

    #[test]
    fn test_negative_zero_is_zero() {
        let v = UsageValue::new(Decimal::NEGATIVE_ONE * Decimal::ZERO).unwrap();
        assert_eq!(v, UsageValue::ZERO);
    }

    #[test]
    fn test_accumulation() {
        let total = UsageValue::from_u64(10)
            .checked_add(UsageValue::from_u64(30))
            .unwrap();
        assert_eq!(total, UsageValue::from_u64(40));
        assert!(UsageValue::new(Decimal::MAX)
            .unwrap()
            .checked_add(UsageValue::from_u64(1))
            .is_err());
    }

    #[test]
    fn test_serde_roundtrip_and_validation() {
        let json = serde_json::to_string(&UsageValue::from_u64(40)).unwrap();
        assert_eq!(json, "\"40\"");
        let back: UsageValue = serde_json::from_str("\"40.0\"").unwrap();
        assert_eq!(back, UsageValue::from_u64(40));
        assert!(serde_json::from_str::<UsageValue>("\"-1\"").is_err());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn sum(values: &[u64]) -> UsageValue {
            values.iter().fold(UsageValue::ZERO, |acc, v| {
                acc.checked_add(UsageValue::from_u64(*v)).unwrap()
            })
        }

        proptest! {
            #[test]
            fn prop_accumulation_is_order_independent(
                values in proptest::collection::vec(0u64..1_000_000_000, 0..64),
                seed in any::<u64>(),
            ) {
                let mut shuffled = values.clone();
                let len = shuffled.len();
                if len > 1 {
                    for i in 0..len {
                        let j = (seed.wrapping_add(i as u64) % len as u64) as usize;
                        shuffled.swap(i, j);
                    }
                }
                prop_assert_eq!(sum(&values), sum(&shuffled));
                prop_assert_eq!(sum(&values), UsageValue::from_u64(values.iter().sum()));
            }

            #[test]
            fn prop_display_parses_back(whole in 0u64..u64::MAX / 2, frac in 0u32..1000) {
                let value = UsageValue::new(Decimal::new(whole as i64, 0) + Decimal::new(frac as i64, 3)).unwrap();
                prop_assert_eq!(value.to_string().parse::<UsageValue>().unwrap(), value);
            }
        }
    }
}
