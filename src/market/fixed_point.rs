//! Canonical fixed-point arithmetic for prices and quantities.
//!
//! Every monetary value inside the engine is an unsigned integer scaled by
//! `10^DECIMALS`. Addition and subtraction are exact; multiplication and
//! division take an explicit [`RoundingMode`] so callers decide whether a
//! sub-scale remainder is an error, rounded up, or truncated.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of decimal places in the canonical representation.
pub const DECIMALS: u8 = 10;

/// Scale factor: `10^DECIMALS`. One whole unit is `10_000_000_000` raw.
pub const SCALE: u128 = 10u128.pow(DECIMALS as u32);

/// Errors raised by fixed-point conversions and arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FpError {
    /// A no-precision-loss operation produced a sub-scale remainder.
    #[error("conversion would lose precision below the canonical scale")]
    PrecisionLoss,

    /// A value carries more decimal places than the target allows.
    #[error("value exceeds the {limit} decimal places allowed here")]
    ExceedsDecimals {
        /// Maximum number of decimal places permitted.
        limit: u8,
    },

    /// An intermediate product or quotient left the representable range.
    #[error("fixed-point arithmetic exceeded the representable range")]
    ExceedsMaxExp,
}

/// Rounding behavior for lossy fixed-point operations.
///
/// The discriminants are part of the caller-facing wire vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RoundingMode {
    /// Fail with [`FpError::PrecisionLoss`] if any remainder would be lost.
    NoLoss = 0,
    /// Round away from zero.
    RoundUp = 1,
    /// Discard the remainder.
    Trunc = 2,
}

impl TryFrom<u8> for RoundingMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(RoundingMode::NoLoss),
            1 => Ok(RoundingMode::RoundUp),
            2 => Ok(RoundingMode::Trunc),
            other => Err(other),
        }
    }
}

/// A non-negative fixed-point number with `DECIMALS` decimal places.
///
/// `Fp` is a plain 16-byte value; it is `Copy` and never allocates. The
/// ordering is the numeric ordering of the underlying raw integer.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Fp(u128);

/// Prices are canonical fixed-point values.
pub type Price = Fp;

/// Quantities are canonical fixed-point values.
pub type Qty = Fp;

impl Fp {
    /// The zero value.
    pub const ZERO: Fp = Fp(0);

    /// Wrap an already-scaled raw value.
    #[inline]
    pub const fn from_raw(raw: u128) -> Self {
        Fp(raw)
    }

    /// One whole unit (`10^DECIMALS` raw).
    #[inline]
    pub const fn one() -> Self {
        Fp(SCALE)
    }

    /// Build from a whole number of units.
    #[inline]
    pub const fn from_int(units: u64) -> Self {
        Fp(units as u128 * SCALE)
    }

    /// The raw scaled integer.
    #[inline]
    pub const fn raw(self) -> u128 {
        self.0
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Exact addition. Saturates at the numeric ceiling, which is
    /// unreachable for balances that fit the coin substrate's `u64` units.
    #[inline]
    pub fn add(self, other: Fp) -> Fp {
        Fp(self.0.saturating_add(other.0))
    }

    /// Exact subtraction. Saturates at zero; engine invariants guarantee the
    /// minuend covers the subtrahend on every internal path.
    #[inline]
    pub fn sub(self, other: Fp) -> Fp {
        Fp(self.0.saturating_sub(other.0))
    }

    #[inline]
    pub fn min(self, other: Fp) -> Fp {
        if self.0 <= other.0 { self } else { other }
    }

    /// Fixed-point multiplication: `self * other / SCALE`.
    pub fn mul(self, other: Fp, mode: RoundingMode) -> Result<Fp, FpError> {
        let product = self
            .0
            .checked_mul(other.0)
            .ok_or(FpError::ExceedsMaxExp)?;
        Ok(Fp(apply_rounding(product, SCALE, mode)?))
    }

    /// Fixed-point division: `self * SCALE / other`.
    pub fn div(self, other: Fp, mode: RoundingMode) -> Result<Fp, FpError> {
        if other.0 == 0 {
            return Err(FpError::ExceedsMaxExp);
        }
        let numerator = self
            .0
            .checked_mul(SCALE)
            .ok_or(FpError::ExceedsMaxExp)?;
        Ok(Fp(apply_rounding(numerator, other.0, mode)?))
    }

    /// Convert raw integer units carrying `decimals` decimal places into
    /// the canonical representation.
    pub fn from_units(value: u64, decimals: u8, _mode: RoundingMode) -> Result<Fp, FpError> {
        if decimals > DECIMALS {
            return Err(FpError::ExceedsDecimals { limit: DECIMALS });
        }
        let factor = 10u128.pow((DECIMALS - decimals) as u32);
        (value as u128)
            .checked_mul(factor)
            .map(Fp)
            .ok_or(FpError::ExceedsMaxExp)
    }

    /// Convert to raw integer units with `decimals` decimal places.
    pub fn to_units(self, decimals: u8, mode: RoundingMode) -> Result<u64, FpError> {
        if decimals > DECIMALS {
            return Err(FpError::ExceedsDecimals { limit: DECIMALS });
        }
        let divisor = 10u128.pow((DECIMALS - decimals) as u32);
        let units = apply_rounding(self.0, divisor, mode)?;
        u64::try_from(units).map_err(|_| FpError::ExceedsMaxExp)
    }

    /// True when the value is representable with at most `decimals`
    /// decimal places.
    #[inline]
    pub fn fits_decimals(self, decimals: u8) -> bool {
        if decimals >= DECIMALS {
            return true;
        }
        let divisor = 10u128.pow((DECIMALS - decimals) as u32);
        self.0 % divisor == 0
    }

    /// Round down to a multiple of the smallest step representable with
    /// `decimals` decimal places.
    #[inline]
    pub fn floor_to_decimals(self, decimals: u8) -> Fp {
        if decimals >= DECIMALS {
            return self;
        }
        let divisor = 10u128.pow((DECIMALS - decimals) as u32);
        Fp(self.0 - self.0 % divisor)
    }

    /// The smallest non-zero value representable with `decimals` decimal
    /// places.
    #[inline]
    pub fn tick(decimals: u8) -> Fp {
        let decimals = decimals.min(DECIMALS);
        Fp(10u128.pow((DECIMALS - decimals) as u32))
    }

    /// Lossy conversion for display-grade metrics. Never feeds back into
    /// book or settlement arithmetic.
    #[inline]
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }
}

fn apply_rounding(value: u128, divisor: u128, mode: RoundingMode) -> Result<u128, FpError> {
    let quotient = value / divisor;
    let remainder = value % divisor;
    match mode {
        RoundingMode::NoLoss if remainder != 0 => Err(FpError::PrecisionLoss),
        RoundingMode::NoLoss | RoundingMode::Trunc => Ok(quotient),
        RoundingMode::RoundUp => Ok(if remainder != 0 {
            quotient + 1
        } else {
            quotient
        }),
    }
}

impl fmt::Display for Fp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let integer = self.0 / SCALE;
        let fraction = self.0 % SCALE;
        if fraction == 0 {
            write!(f, "{integer}")
        } else {
            let frac = format!("{fraction:010}");
            write!(f, "{integer}.{}", frac.trim_end_matches('0'))
        }
    }
}

impl FromStr for Fp {
    type Err = FpError;

    /// Parse a decimal string such as `"8.5"` into the canonical
    /// representation. Fails when the fractional part exceeds `DECIMALS`
    /// digits.
    fn from_str(s: &str) -> Result<Self, FpError> {
        let trimmed = s.trim();
        let (int_part, frac_part) = match trimmed.split_once('.') {
            Some((i, f)) => (i, f),
            None => (trimmed, ""),
        };
        let integer: u128 = int_part.parse().map_err(|_| FpError::PrecisionLoss)?;
        if frac_part.len() > DECIMALS as usize {
            return Err(FpError::ExceedsDecimals { limit: DECIMALS });
        }
        let fraction: u128 = if frac_part.is_empty() {
            0
        } else {
            let digits: u128 = frac_part.parse().map_err(|_| FpError::PrecisionLoss)?;
            digits * 10u128.pow((DECIMALS as usize - frac_part.len()) as u32)
        };
        integer
            .checked_mul(SCALE)
            .and_then(|i| i.checked_add(fraction))
            .map(Fp)
            .ok_or(FpError::ExceedsMaxExp)
    }
}
