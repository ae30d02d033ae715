//! Lossless token amount type backed by rust_decimal.
//!
//! Amounts are persisted and serialized as canonical strings so that
//! replaying stored state never goes through a float.

use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lossless decimal amount for balances, allowances, bids and prices.
///
/// Arithmetic is exact and signed: a compensating subtraction must always
/// undo the addition it compensates, so nothing here clamps at zero unless
/// the caller asks for it with [`Decimal::saturating_sub`]. `+` and `-` are
/// checked and return [`ArithmeticError`] once the 96-bit mantissa is
/// exhausted.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::str")] RustDecimal);

impl Decimal {
    pub fn new(value: RustDecimal) -> Self {
        Decimal(value)
    }

    /// Parse a Decimal from a string losslessly.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s).map(Decimal)
    }

    /// Convert a raw on-chain integer (e.g. a `balanceOf` word) into a Decimal.
    ///
    /// Returns `None` when the value does not fit the 96-bit mantissa.
    pub fn from_u128(value: u128) -> Option<Self> {
        RustDecimal::from_str(&value.to_string()).ok().map(Decimal)
    }

    pub fn from_i64(value: i64) -> Self {
        Decimal(RustDecimal::from(value))
    }

    /// Canonical string form: trailing zeros removed, never exponent notation.
    pub fn to_canonical_string(&self) -> String {
        format!("{}", self.0.normalize())
    }

    pub fn inner(&self) -> RustDecimal {
        self.0
    }

    pub fn zero() -> Self {
        Decimal(RustDecimal::ZERO)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }

    pub fn abs(&self) -> Self {
        Decimal(self.0.abs())
    }

    /// Subtract, clamping the result at zero.
    pub fn saturating_sub(self, rhs: Decimal) -> Decimal {
        Decimal(self.0.saturating_sub(rhs.0).max(RustDecimal::ZERO))
    }

    pub fn max_value() -> Self {
        Decimal(RustDecimal::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("arithmetic overflow: {lhs} {operation} {rhs}")]
pub struct ArithmeticError {
    pub operation: &'static str,
    pub lhs: Decimal,
    pub rhs: Decimal,
}

/// Sum every amount, stopping at the first overflow.
pub fn checked_sum<I: IntoIterator<Item = Decimal>>(iter: I) -> Result<Decimal, ArithmeticError> {
    iter.into_iter()
        .try_fold(Decimal::zero(), |acc, d| acc + d)
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Decimal {
    fn from(value: RustDecimal) -> Self {
        Decimal(value)
    }
}

impl From<u64> for Decimal {
    fn from(value: u64) -> Self {
        Decimal(RustDecimal::from(value))
    }
}

impl std::ops::Add for Decimal {
    type Output = Result<Decimal, ArithmeticError>;

    fn add(self, rhs: Decimal) -> Self::Output {
        self.0
            .checked_add(rhs.0)
            .map(Decimal)
            .ok_or(ArithmeticError {
                operation: "+",
                lhs: self,
                rhs,
            })
    }
}

impl std::ops::Sub for Decimal {
    type Output = Result<Decimal, ArithmeticError>;

    fn sub(self, rhs: Decimal) -> Self::Output {
        self.0
            .checked_sub(rhs.0)
            .map(Decimal)
            .ok_or(ArithmeticError {
                operation: "-",
                lhs: self,
                rhs,
            })
    }
}

impl std::ops::Neg for Decimal {
    type Output = Decimal;

    fn neg(self) -> Decimal {
        Decimal(-self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_string_drops_trailing_zeros() {
        let d = Decimal::from_str_canonical("17.000").unwrap();
        assert_eq!(d.to_canonical_string(), "17");
    }

    #[test]
    fn test_serializes_as_string() {
        let d = Decimal::from_str_canonical("123.456").unwrap();
        let json = serde_json::to_value(d).unwrap();
        assert!(json.is_string());
        let back: Decimal = serde_json::from_value(json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn test_add_then_sub_is_exact() {
        let base = Decimal::from(7u64);
        let value = Decimal::from_str_canonical("0.1").unwrap();
        assert_eq!((base + value).and_then(|d| d - value), Ok(base));
    }

    #[test]
    fn test_saturating_sub_clamps_at_zero() {
        let a = Decimal::from(2u64);
        let b = Decimal::from(5u64);
        assert_eq!(a.saturating_sub(b), Decimal::zero());
        assert_eq!(b.saturating_sub(a), Decimal::from(3u64));
    }

    #[test]
    fn test_from_u128_overflow() {
        assert_eq!(Decimal::from_u128(42), Some(Decimal::from(42u64)));
        assert!(Decimal::from_u128(u128::MAX).is_none());
    }

    #[test]
    fn test_checked_sum() {
        let total = checked_sum(vec![
            Decimal::from(1u64),
            Decimal::from(2u64),
            -Decimal::from(4u64),
        ])
        .unwrap();
        assert_eq!(total, Decimal::from_i64(-1));
        assert!(total.is_negative());
    }

    #[test]
    fn test_overflow_is_an_error() {
        let max = Decimal::max_value();
        let err = (max + Decimal::from(1u64)).unwrap_err();
        assert_eq!(err.operation, "+");
        assert_eq!(err.lhs, max);
        assert!((-max - Decimal::from(1u64)).is_err());
        assert!(checked_sum(vec![max, max]).is_err());
        assert_eq!(max.saturating_sub(-max), max);
    }
}
