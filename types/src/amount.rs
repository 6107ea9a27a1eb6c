//! Token amounts.
//!
//! The authority exchanges amounts as JSON floating-point numbers. The client
//! keeps them as fixed-point integers with [`Amount::DECIMALS`] fractional
//! digits so that fee sums are exact (`10 + 0.5 + 1.0` is `11.5`, not
//! `11.499999...`). Conversion to and from `f64` only happens at the wire.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::Add;
use std::str::FromStr;

use crate::error::AmountError;

/// A non-negative token amount, stored as raw units of `10^-DECIMALS`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Self = Self(0);

    /// Number of fractional digits carried.
    pub const DECIMALS: u32 = 8;

    const SCALE: u128 = 10u128.pow(Self::DECIMALS);

    pub fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    /// Whole units, e.g. `Amount::from_units(10)` is `10.0`.
    pub fn from_units(units: u64) -> Self {
        Self(units as u128 * Self::SCALE)
    }

    pub fn raw(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Convert a wire value, rounding to the nearest raw unit.
    pub fn from_f64(value: f64) -> Result<Self, AmountError> {
        if !value.is_finite() {
            return Err(AmountError::NotFinite(value.to_string()));
        }
        if value < 0.0 {
            return Err(AmountError::Negative(value.to_string()));
        }
        let scaled = (value * Self::SCALE as f64).round();
        if scaled >= u128::MAX as f64 {
            return Err(AmountError::Overflow(value.to_string()));
        }
        Ok(Self(scaled as u128))
    }

    pub fn to_f64(&self) -> f64 {
        let whole = (self.0 / Self::SCALE) as f64;
        let frac = (self.0 % Self::SCALE) as f64 / Self::SCALE as f64;
        whole + frac
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl Add for Amount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / Self::SCALE;
        let frac = self.0 % Self::SCALE;
        if frac == 0 {
            return write!(f, "{whole}");
        }
        let digits = format!("{:0width$}", frac, width = Self::DECIMALS as usize);
        write!(f, "{whole}.{}", digits.trim_end_matches('0'))
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    /// Parse a decimal string exactly (no float rounding).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with('-') {
            return Err(AmountError::Negative(s.to_string()));
        }
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(AmountError::Invalid(s.to_string()));
        }
        let all_digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if !all_digits(whole) || !all_digits(frac) {
            return Err(AmountError::Invalid(s.to_string()));
        }
        if frac.len() > Self::DECIMALS as usize {
            return Err(AmountError::TooPrecise {
                input: s.to_string(),
                max: Self::DECIMALS,
            });
        }

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| AmountError::Overflow(s.to_string()))?
        };
        let frac_raw: u128 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac, width = Self::DECIMALS as usize);
            padded
                .parse()
                .map_err(|_| AmountError::Invalid(s.to_string()))?
        };

        whole
            .checked_mul(Self::SCALE)
            .and_then(|w| w.checked_add(frac_raw))
            .map(Self)
            .ok_or_else(|| AmountError::Overflow(s.to_string()))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Amount::from_f64(value).map_err(serde::de::Error::custom)
    }
}
