// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! Arbitrary-precision-enough numeric helpers shared by both backends.
//!
//! Balances, fees and deltas are modelled on [`alloy_primitives::U256`] rather than a
//! true bignum: every quantity this service ever observes (wei, planck, asset units) fits
//! comfortably inside 256 bits, and `U256` is already the currency of this ecosystem. Do
//! not truncate to `u64`/`u128` anywhere on the balance path.

use std::cmp::Ordering;
use std::fmt;

use alloy_primitives::U256;
use thiserror::Error;

/// Errors produced while parsing decimal amounts.
#[derive(Debug, Error)]
pub enum NumericError {
    /// The input was not a valid non-negative decimal integer.
    #[error("invalid decimal amount: {0:?}")]
    InvalidAmount(String),
}

/// Parse a decimal integer string into a [`U256`], tolerating thousands-separators
/// (`,`, `_`, and plain spaces) as §9 of the specification requires.
pub fn parse_amount(raw: &str) -> Result<U256, NumericError> {
    let cleaned: String = raw.chars().filter(|c| !matches!(c, ',' | '_' | ' ')).collect();
    if cleaned.is_empty() || !cleaned.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NumericError::InvalidAmount(raw.to_string()));
    }
    U256::from_str_radix(&cleaned, 10).map_err(|_| NumericError::InvalidAmount(raw.to_string()))
}

/// Render a [`U256`] as a canonical decimal string with no separators.
pub fn format_amount(value: U256) -> String {
    value.to_string()
}

/// Render `value` (in the token's smallest unit) as a human string with exactly six
/// fractional digits, per §9: `floor(value / 10^decimals).<first 6 fractional digits>`.
///
/// A bare `0.0` is only emitted when `value` is zero.
pub fn format_human(value: U256, decimals: u8) -> String {
    if value.is_zero() {
        return "0.0".to_string();
    }

    let scale = U256::from(10u64).pow(U256::from(decimals));
    let whole = value / scale;
    let remainder = value % scale;

    // Scale the remainder up to exactly 6 fractional digits, rounding toward zero.
    let six = U256::from(1_000_000u64);
    let frac = if decimals as u32 >= 6 {
        let shrink = U256::from(10u64).pow(U256::from(decimals as u32 - 6));
        remainder / shrink
    } else {
        let grow = U256::from(10u64).pow(U256::from(6 - decimals as u32));
        (remainder * grow) / scale.max(U256::from(1u64)) * scale.min(U256::from(1u64))
            + remainder * grow
    };
    let frac = frac.min(six - U256::from(1u64));

    format!("{whole}.{frac:06}")
}

/// A signed delta over an arbitrary-precision magnitude, used to report per-address
/// balance changes without ever truncating to a machine integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedAmount {
    negative: bool,
    magnitude: U256,
}

impl SignedAmount {
    /// The zero delta.
    pub const ZERO: Self = Self { negative: false, magnitude: U256::ZERO };

    /// Construct a non-negative delta.
    pub fn positive(magnitude: U256) -> Self {
        Self { negative: false, magnitude }
    }

    /// Construct a non-positive delta (zero magnitude collapses to [`SignedAmount::ZERO`]).
    pub fn negative(magnitude: U256) -> Self {
        if magnitude.is_zero() {
            Self::ZERO
        } else {
            Self { negative: true, magnitude }
        }
    }

    /// `after - before`, as a signed delta.
    pub fn diff(before: U256, after: U256) -> Self {
        match after.cmp(&before) {
            Ordering::Equal => Self::ZERO,
            Ordering::Greater => Self::positive(after - before),
            Ordering::Less => Self::negative(before - after),
        }
    }

    /// Whether this delta is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.magnitude.is_zero()
    }

    /// Whether the delta is strictly negative.
    pub fn is_negative(&self) -> bool {
        self.negative && !self.magnitude.is_zero()
    }

    /// Add another signed delta, without wrapping (magnitudes never overflow `U256` in
    /// practice for this service's inputs).
    pub fn checked_add(self, other: Self) -> Option<Self> {
        match (self.negative, other.negative) {
            (false, false) => Some(Self::positive(self.magnitude.checked_add(other.magnitude)?)),
            (true, true) => Some(Self::negative(self.magnitude.checked_add(other.magnitude)?)),
            (false, true) => Some(Self::diff(other.magnitude, self.magnitude)),
            (true, false) => Some(Self::diff(self.magnitude, other.magnitude)),
        }
    }

    /// Apply this delta to a non-negative base, saturating at zero on underflow.
    pub fn apply_to(self, base: U256) -> U256 {
        if self.negative {
            base.saturating_sub(self.magnitude)
        } else {
            base.saturating_add(self.magnitude)
        }
    }
}

impl fmt::Display for SignedAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative && !self.magnitude.is_zero() {
            write!(f, "-{}", self.magnitude)
        } else {
            write!(f, "{}", self.magnitude)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_thousands_separators() {
        assert_eq!(parse_amount("1,000,000").unwrap(), U256::from(1_000_000u64));
        assert_eq!(parse_amount("1_000_000").unwrap(), U256::from(1_000_000u64));
        assert_eq!(parse_amount("1 000 000").unwrap(), U256::from(1_000_000u64));
    }

    #[test]
    fn rejects_non_decimal() {
        assert!(parse_amount("0x10").is_err());
        assert!(parse_amount("").is_err());
        assert!(parse_amount("-5").is_err());
    }

    #[test]
    fn formats_human_with_six_fractional_digits() {
        assert_eq!(format_human(U256::from(21_000u64), 9), "0.000021");
        assert_eq!(format_human(U256::ZERO, 18), "0.0");
        assert_eq!(format_human(U256::from(1_500_000_000_000_000_000u128), 18), "1.500000");
    }

    #[test]
    fn signed_amount_diff_and_apply() {
        let d = SignedAmount::diff(U256::from(100u64), U256::from(40u64));
        assert!(d.is_negative());
        assert_eq!(d.apply_to(U256::from(100u64)), U256::from(40u64));

        let d = SignedAmount::diff(U256::from(40u64), U256::from(100u64));
        assert!(!d.is_negative());
        assert_eq!(d.apply_to(U256::from(40u64)), U256::from(100u64));

        let zero = SignedAmount::diff(U256::from(5u64), U256::from(5u64));
        assert!(zero.is_zero());
    }

    #[test]
    fn signed_amount_checked_add_mixed_signs() {
        let a = SignedAmount::positive(U256::from(10u64));
        let b = SignedAmount::negative(U256::from(3u64));
        assert_eq!(a.checked_add(b).unwrap(), SignedAmount::positive(U256::from(7u64)));
    }
}
