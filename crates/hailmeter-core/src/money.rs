//! # Money Module
//!
//! Provides the `Money` type for fares, fees and pricing rates.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  A live fare is recomputed on every GPS tick and once more at the      │
//! │  end of the trip. Both values MUST agree to the cent.                   │
//! │                                                                         │
//! │  In floating point:                                                     │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ display and settlement drift     │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Cents                                            │
//! │    Fractional products (miles × rate) are rounded to whole cents       │
//! │    exactly once, at the moment they become Money.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use hailmeter_core::money::Money;
//!
//! let per_mile = Money::from_cents(250);          // $2.50
//! let distance_fare = per_mile.times_fraction(3.2); // 3.2 mi
//! assert_eq!(distance_fare.cents(), 800);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

use crate::types::Multiplier;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents for USD).
///
/// ## Design Decisions
/// - **i64 (signed)**: rounding adjustments can be negative
/// - **Single field tuple struct**: serializes as a bare number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    ///
    /// ## Example
    /// ```rust
    /// use hailmeter_core::money::Money;
    ///
    /// let fare = Money::from_cents(1099); // $10.99
    /// assert_eq!(fare.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from major and minor units (dollars and cents).
    ///
    /// For negative amounts only the major unit carries the sign:
    /// `from_major_minor(-5, 50)` is -$5.50.
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit (dollars) portion.
    #[inline]
    pub const fn dollars(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit (cents) portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Clamps negative values to zero.
    ///
    /// Every monetary input to the fare calculator passes through this, so a
    /// misconfigured negative rate can never reduce a fare below its parts.
    #[inline]
    pub const fn non_negative(&self) -> Self {
        if self.0 < 0 {
            Money(0)
        } else {
            *self
        }
    }

    /// Multiplies a per-unit rate by a fractional quantity (miles, minutes).
    ///
    /// The exact product is rounded half away from zero to a whole cent.
    /// Non-finite or negative quantities count as zero.
    ///
    /// ## Example
    /// ```rust
    /// use hailmeter_core::money::Money;
    ///
    /// let per_minute = Money::from_cents(35);
    /// assert_eq!(per_minute.times_fraction(2.5).cents(), 88); // 87.5 → 88
    /// assert_eq!(per_minute.times_fraction(f64::NAN).cents(), 0);
    /// ```
    pub fn times_fraction(&self, quantity: f64) -> Money {
        if !quantity.is_finite() || quantity <= 0.0 {
            return Money::zero();
        }
        let exact = self.0 as f64 * quantity;
        Money(exact.round() as i64)
    }

    /// Applies a multiplier expressed in basis points.
    ///
    /// ## Implementation
    /// Integer math: `(amount * bps + 5000) / 10000`, the same rounding used
    /// everywhere a rate is applied to cents.
    ///
    /// ## Example
    /// ```rust
    /// use hailmeter_core::money::Money;
    /// use hailmeter_core::types::Multiplier;
    ///
    /// let subtotal = Money::from_cents(1000);
    /// let surged = subtotal.apply_multiplier(Multiplier::from_bps(15_000));
    /// assert_eq!(surged.cents(), 1500);
    /// ```
    pub fn apply_multiplier(&self, multiplier: Multiplier) -> Money {
        // i128 prevents overflow on large amounts
        let cents = (self.0 as i128 * multiplier.bps() as i128 + 5000) / 10000;
        Money::from_cents(cents.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }

    /// Rounds to the nearest multiple of `step_cents`. Ties round up.
    ///
    /// A step of zero or less returns the value unchanged. Near `i64::MAX`,
    /// where rounding up would overflow, the value rounds down instead.
    ///
    /// ## Example
    /// ```rust
    /// use hailmeter_core::money::Money;
    ///
    /// // $13.10 to the nearest quarter: $13.00 is 10¢ away, $13.25 is 15¢ away
    /// assert_eq!(Money::from_cents(1310).round_to_step(25).cents(), 1300);
    /// assert_eq!(Money::from_cents(1305).round_to_step(10).cents(), 1310);
    /// ```
    pub fn round_to_step(&self, step_cents: i64) -> Money {
        if step_cents <= 0 {
            return *self;
        }
        let remainder = self.0.rem_euclid(step_cents);
        let floor = self.0.saturating_sub(remainder);
        if remainder >= step_cents - remainder {
            Money(floor.checked_add(step_cents).unwrap_or(floor))
        } else {
            Money(floor)
        }
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================
//
// Arithmetic saturates at the i64 bounds so fare computation stays total on
// absurd inputs.

/// Display implementation shows money in a human-readable format.
///
/// ## Note
/// This is for logs and the CLI. The driver app formats for its own locale.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}${}.{:02}", sign, self.dollars().abs(), self.cents_part())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0.saturating_add(other.0))
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 = self.0.saturating_add(other.0);
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0.saturating_sub(other.0))
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 = self.0.saturating_sub(other.0);
    }
}

/// Multiplication by a whole count (extra passengers).
impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0.saturating_mul(qty))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
