//! # Fare Calculation
//!
//! Pure mapping from measurements and pricing rules to a [`FareBreakdown`].
//!
//! ## Calculation Order (metered)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  base + miles × per_mile + minutes × per_minute     = subtotal          │
//! │                     │                                                   │
//! │                     ▼                                                   │
//! │  subtotal < minimum?  ──yes──►  subtotal = minimum (minimum_applied)    │
//! │                     │                                                   │
//! │                     ▼                                                   │
//! │  surge enabled and > 1.0x?  ──►  subtotal × surge                       │
//! │                     │            = subtotal_before_extras               │
//! │                     ▼                                                   │
//! │  + extra passengers + other fees  = subtotal_with_extras                │
//! │                     │                                                   │
//! │                     ▼                                                   │
//! │  round to step (ties up)          = total                               │
//! │  rounding_adjustment = total − subtotal_with_extras                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A flat-rate trip is a fixed price agreed with the passenger: only extra
//! passengers and other fees are added, with no minimum, surge or rounding.
//!
//! The live fare shown while driving and the final fare submitted at the end
//! of the trip come from the same call with the same inputs, so they agree
//! to the cent.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::meter::MeterReading;
use crate::money::Money;
use crate::types::{Multiplier, OtherFee, PricingConfig, RoundingMode, TripContext};

// =============================================================================
// Fare Breakdown
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum FareMode {
    Meter,
    Flat,
}

/// Every line of a computed fare.
///
/// Derived on demand and never stored as the source of truth; it can always
/// be recomputed from the snapshot and its pricing config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct FareBreakdown {
    pub mode: FareMode,
    pub base_fare: Money,
    pub distance_fare: Money,
    pub wait_fare: Money,
    /// Multiplier actually applied (1.0x when surge did not apply).
    pub surge_multiplier: Multiplier,
    pub minimum_applied: bool,
    pub extra_passenger_fare: Money,
    pub other_fees_total: Money,
    pub other_fees: Vec<OtherFee>,
    pub subtotal_before_extras: Money,
    pub subtotal_with_extras: Money,
    pub rounding_mode: RoundingMode,
    /// `total − subtotal_with_extras`; may be negative.
    pub rounding_adjustment: Money,
    pub total: Money,
}

// =============================================================================
// Calculation
// =============================================================================

/// Computes a fare.
///
/// Negative or non-finite quantities and negative amounts are treated as
/// zero; `passenger_count` is clamped to at least one.
///
/// ## Example
/// ```rust
/// use hailmeter_core::fare::{compute_fare, FareMode};
/// use hailmeter_core::money::Money;
/// use hailmeter_core::types::PricingConfig;
///
/// let config = PricingConfig::new(Money::from_cents(250), Money::from_cents(50));
/// let fare = compute_fare(&config, 2.0, 3.0, 1, &[], None);
///
/// assert_eq!(fare.mode, FareMode::Meter);
/// assert_eq!(fare.distance_fare.cents(), 500);
/// assert_eq!(fare.wait_fare.cents(), 150);
/// assert_eq!(fare.total.cents(), 650);
/// ```
pub fn compute_fare(
    config: &PricingConfig,
    distance_miles: f64,
    wait_minutes: f64,
    passenger_count: u32,
    other_fees: &[OtherFee],
    flat_rate: Option<Money>,
) -> FareBreakdown {
    let passengers = passenger_count.max(1) as i64;
    let extra_passenger_fare = config.extra_passenger_fare.non_negative() * (passengers - 1);

    let other_fees: Vec<OtherFee> = other_fees
        .iter()
        .map(|fee| OtherFee::new(fee.label.clone(), fee.amount.non_negative()))
        .collect();
    let other_fees_total: Money = other_fees.iter().map(|fee| fee.amount).sum();

    if let Some(flat) = flat_rate {
        let flat = flat.non_negative();
        let total = flat + extra_passenger_fare + other_fees_total;
        return FareBreakdown {
            mode: FareMode::Flat,
            base_fare: flat,
            distance_fare: Money::zero(),
            wait_fare: Money::zero(),
            surge_multiplier: Multiplier::one(),
            minimum_applied: false,
            extra_passenger_fare,
            other_fees_total,
            other_fees,
            subtotal_before_extras: flat,
            subtotal_with_extras: total,
            rounding_mode: RoundingMode::None,
            rounding_adjustment: Money::zero(),
            total,
        };
    }

    let base_fare = config.base_fare.non_negative();
    let distance_fare = config.fare_per_mile.non_negative().times_fraction(distance_miles);
    let wait_fare = config
        .wait_time_per_minute
        .non_negative()
        .times_fraction(wait_minutes);

    let mut subtotal = base_fare + distance_fare + wait_fare;

    let minimum = config.minimum_fare.non_negative();
    let minimum_applied = minimum.is_positive() && subtotal < minimum;
    if minimum_applied {
        subtotal = minimum;
    }

    let surge_multiplier = if config.surge_enabled && config.surge_multiplier.is_above_one() {
        config.surge_multiplier
    } else {
        Multiplier::one()
    };
    let subtotal_before_extras = subtotal.apply_multiplier(surge_multiplier);

    let subtotal_with_extras = subtotal_before_extras + extra_passenger_fare + other_fees_total;

    let rounding_mode = config.meter_rounding_mode;
    let total = subtotal_with_extras.round_to_step(rounding_mode.step_cents());

    FareBreakdown {
        mode: FareMode::Meter,
        base_fare,
        distance_fare,
        wait_fare,
        surge_multiplier,
        minimum_applied,
        extra_passenger_fare,
        other_fees_total,
        other_fees,
        subtotal_before_extras,
        subtotal_with_extras,
        rounding_mode,
        rounding_adjustment: total - subtotal_with_extras,
        total,
    }
}

/// Convenience wrapper pricing a meter reading under a trip context.
pub fn fare_for_trip(
    config: &PricingConfig,
    reading: &MeterReading,
    context: &TripContext,
) -> FareBreakdown {
    compute_fare(
        config,
        reading.distance_miles,
        reading.wait_minutes,
        context.passenger_count,
        &context.other_fees,
        context.flat_rate.as_ref().map(|option| option.amount),
    )
}

// =============================================================================
// Unit Tests
// =============================================================================
