//! Fixed-point monetary amounts
//!
//! Every monetary quantity (bankroll, equity, order size, liquidity, volume)
//! is an [`Amount`]: a non-negative integer count of the smallest base unit
//! of the quote currency, stored in a `rust_decimal::Decimal` with scale 0.
//! A `Decimal` holds up to 96 bits of mantissa, so amounts up to ~7.9e28
//! base units (e.g. 79 billion whole tokens at 18 decimals) are representable.
//!
//! All arithmetic is checked. Ratios are quantized to [`RATIO_DP`] decimal
//! places before multiplying, and the product truncates toward zero.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AmountError;

/// Decimal places kept when a float ratio is applied to an amount
pub const RATIO_DP: u32 = 12;

/// Non-negative integral amount in base units
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    /// Build from a whole number of base units
    pub fn from_units(units: u64) -> Self {
        Amount(Decimal::from(units))
    }

    /// Build from a decimal value, truncating any fractional part.
    /// Fails for negative values.
    pub fn from_decimal_trunc(value: Decimal) -> Result<Self, AmountError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(AmountError::Negative(value.to_string()));
        }
        Ok(Amount(value.trunc().normalize()))
    }

    /// Build from a decimal value, clamping negatives to zero
    pub fn saturating_from_decimal(value: Decimal) -> Self {
        if value.is_sign_negative() {
            Amount::ZERO
        } else {
            Amount(value.trunc().normalize())
        }
    }

    /// Build from an `f64` quantity of base units (truncated).
    /// Used at the edges where floats arrive from feeds.
    pub fn from_f64_trunc(value: f64) -> Result<Self, AmountError> {
        if !value.is_finite() {
            return Err(AmountError::NotFinite);
        }
        let d = Decimal::from_f64(value).ok_or(AmountError::Overflow)?;
        Self::from_decimal_trunc(d)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Lossy conversion for ratio computations
    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(f64::MAX)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(self, rhs: Amount) -> Result<Amount, AmountError> {
        self.0
            .checked_add(rhs.0)
            .map(Amount)
            .ok_or(AmountError::Overflow)
    }

    /// Fails when the result would be negative
    pub fn checked_sub(self, rhs: Amount) -> Result<Amount, AmountError> {
        if rhs.0 > self.0 {
            return Err(AmountError::Negative(format!("{} - {}", self.0, rhs.0)));
        }
        Ok(Amount(self.0 - rhs.0))
    }

    pub fn saturating_sub(self, rhs: Amount) -> Amount {
        if rhs.0 > self.0 {
            Amount::ZERO
        } else {
            Amount(self.0 - rhs.0)
        }
    }

    /// Multiply by a non-negative ratio, truncating toward zero
    pub fn mul_ratio(self, ratio: f64) -> Result<Amount, AmountError> {
        if !ratio.is_finite() {
            return Err(AmountError::NotFinite);
        }
        if ratio < 0.0 {
            return Err(AmountError::Negative(ratio.to_string()));
        }
        let r = Decimal::from_f64_retain(ratio)
            .ok_or(AmountError::Overflow)?
            .round_dp_with_strategy(RATIO_DP, RoundingStrategy::MidpointNearestEven);
        let product = self.0.checked_mul(r).ok_or(AmountError::Overflow)?;
        Ok(Amount(product.trunc().normalize()))
    }

    /// `self / rhs` as a float ratio; zero when `rhs` is zero
    pub fn ratio_to(&self, rhs: Amount) -> f64 {
        if rhs.is_zero() {
            return 0.0;
        }
        (self.0 / rhs.0).to_f64().unwrap_or(0.0)
    }

    pub fn min(self, other: Amount) -> Amount {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::from_decimal_trunc(value)
    }
}

impl From<Amount> for Decimal {
    fn from(value: Amount) -> Self {
        value.0
    }
}

impl From<u64> for Amount {
    fn from(units: u64) -> Self {
        Amount::from_units(units)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    /// Accepts plain integers and scientific notation ("2e18")
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let d = Decimal::from_str(s)
            .or_else(|_| Decimal::from_scientific(s))
            .map_err(|_| AmountError::Parse(s.to_string()))?;
        Amount::from_decimal_trunc(d)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
