//! # Domain Types
//!
//! Value types shared by the meter, the fare calculator and the outbox.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ LocationSample  │   │  PricingConfig  │   │   TripContext   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  coordinate     │   │  fare_per_mile  │   │  booking_id     │       │
//! │  │  timestamp_ms   │   │  wait_per_min   │   │  passengers     │       │
//! │  │  speed_mps?     │   │  minimum_fare   │   │  other_fees     │       │
//! │  │  accuracy_m?    │   │  surge, rounding│   │  flat_rate?     │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   Multiplier    │   │  RoundingMode   │   │   OutboxKind    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  bps (u32)      │   │  None           │   │  StatusUpdate   │       │
//! │  │  15000 = 1.5x   │   │  Nearest0_25 …  │   │  FlagdownThen…  │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `PricingConfig` is fetched before a trip and never mutated while the trip
//! runs; the engine copies it into the snapshot so a restarted process prices
//! the trip with the same rules it started with.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::geo::Coordinate;
use crate::money::Money;

// =============================================================================
// Multiplier
// =============================================================================

/// A multiplier represented in basis points (bps).
///
/// 10_000 bps = 1.0x, 15_000 bps = 1.5x. Integer storage keeps surge pricing
/// exact and comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Multiplier(u32);

impl Multiplier {
    /// Basis points for a neutral multiplier.
    pub const ONE_BPS: u32 = 10_000;

    /// Creates a multiplier from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        Multiplier(bps)
    }

    /// Creates a multiplier from a factor (1.5 → 15_000 bps).
    ///
    /// Non-finite or negative factors collapse to zero.
    pub fn from_factor(factor: f64) -> Self {
        if !factor.is_finite() || factor <= 0.0 {
            return Multiplier(0);
        }
        Multiplier((factor * Self::ONE_BPS as f64).round() as u32)
    }

    /// The neutral 1.0x multiplier.
    #[inline]
    pub const fn one() -> Self {
        Multiplier(Self::ONE_BPS)
    }

    /// Returns the multiplier in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the multiplier as a factor (for display only).
    #[inline]
    pub fn factor(&self) -> f64 {
        self.0 as f64 / Self::ONE_BPS as f64
    }

    /// True when the multiplier would raise a price.
    #[inline]
    pub const fn is_above_one(&self) -> bool {
        self.0 > Self::ONE_BPS
    }
}

impl Default for Multiplier {
    fn default() -> Self {
        Multiplier::one()
    }
}

// =============================================================================
// Location Sample
// =============================================================================

/// One reading from the device location provider.
///
/// The meter never originates samples; they arrive from the platform and may
/// be duplicated, delayed or out of order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub coordinate: Coordinate,

    /// Fix time in Unix milliseconds.
    pub timestamp_ms: i64,

    /// Speed reported by the sensor, metres per second. Negative means unknown
    /// on most platforms.
    #[serde(default)]
    pub speed_mps: Option<f64>,

    #[serde(default)]
    pub heading_deg: Option<f64>,

    #[serde(default)]
    pub accuracy_m: Option<f64>,
}

impl LocationSample {
    /// Creates a sample with only position and time.
    pub fn new(coordinate: Coordinate, timestamp_ms: i64) -> Self {
        LocationSample {
            coordinate,
            timestamp_ms,
            speed_mps: None,
            heading_deg: None,
            accuracy_m: None,
        }
    }

    /// Sets the reported speed.
    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    /// Sets the reported accuracy radius.
    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }
}

// =============================================================================
// Rounding Mode
// =============================================================================

/// How a metered total is rounded for the passenger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum RoundingMode {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "nearest_0.1")]
    Nearest0_10,
    #[serde(rename = "nearest_0.25")]
    Nearest0_25,
    #[serde(rename = "nearest_0.5")]
    Nearest0_50,
    #[serde(rename = "nearest_1")]
    Nearest1,
}

impl RoundingMode {
    /// Rounding step in cents; zero means no rounding.
    pub const fn step_cents(&self) -> i64 {
        match self {
            RoundingMode::None => 0,
            RoundingMode::Nearest0_10 => 10,
            RoundingMode::Nearest0_25 => 25,
            RoundingMode::Nearest0_50 => 50,
            RoundingMode::Nearest1 => 100,
        }
    }
}

impl std::fmt::Display for RoundingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoundingMode::None => write!(f, "none"),
            RoundingMode::Nearest0_10 => write!(f, "nearest_0.1"),
            RoundingMode::Nearest0_25 => write!(f, "nearest_0.25"),
            RoundingMode::Nearest0_50 => write!(f, "nearest_0.5"),
            RoundingMode::Nearest1 => write!(f, "nearest_1"),
        }
    }
}

// =============================================================================
// Pricing Configuration
// =============================================================================

/// Pricing rules for one trip, as delivered by the pricing boundary.
///
/// All amounts are cents. Optional knobs fall back to the defaults below when
/// the backend omits them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PricingConfig {
    pub fare_per_mile: Money,

    pub wait_time_per_minute: Money,

    #[serde(default)]
    pub base_fare: Money,

    /// Zero disables the minimum.
    #[serde(default)]
    pub minimum_fare: Money,

    /// Charged once for every passenger beyond the first.
    #[serde(default)]
    pub extra_passenger_fare: Money,

    /// At or below this speed the taxi is considered waiting.
    #[serde(default = "default_wait_trigger_speed_mph")]
    pub wait_trigger_speed_mph: f64,

    /// Leading seconds of every idle period that are never billed.
    #[serde(default = "default_idle_grace_period_seconds")]
    pub idle_grace_period_seconds: f64,

    #[serde(default)]
    pub surge_enabled: bool,

    #[serde(default)]
    pub surge_multiplier: Multiplier,

    #[serde(default)]
    pub meter_rounding_mode: RoundingMode,
}

fn default_wait_trigger_speed_mph() -> f64 {
    3.0
}

fn default_idle_grace_period_seconds() -> f64 {
    45.0
}

impl PricingConfig {
    /// Creates a config with the two mandatory rates and defaults elsewhere.
    pub fn new(fare_per_mile: Money, wait_time_per_minute: Money) -> Self {
        PricingConfig {
            fare_per_mile,
            wait_time_per_minute,
            base_fare: Money::zero(),
            minimum_fare: Money::zero(),
            extra_passenger_fare: Money::zero(),
            wait_trigger_speed_mph: default_wait_trigger_speed_mph(),
            idle_grace_period_seconds: default_idle_grace_period_seconds(),
            surge_enabled: false,
            surge_multiplier: Multiplier::one(),
            meter_rounding_mode: RoundingMode::None,
        }
    }

    /// Wait trigger speed, falling back to the default when the configured
    /// value is unusable.
    pub fn effective_wait_trigger_mph(&self) -> f64 {
        if self.wait_trigger_speed_mph.is_finite() && self.wait_trigger_speed_mph >= 0.0 {
            self.wait_trigger_speed_mph
        } else {
            default_wait_trigger_speed_mph()
        }
    }

    /// Idle grace period clamped to zero or more.
    pub fn effective_grace_seconds(&self) -> f64 {
        if self.idle_grace_period_seconds.is_finite() && self.idle_grace_period_seconds > 0.0 {
            self.idle_grace_period_seconds
        } else {
            0.0
        }
    }

    /// Replaces the float knobs with their effective values.
    ///
    /// JSON has no NaN or infinity, so a config stored in a snapshot must
    /// hold finite numbers only.
    pub fn sanitized(mut self) -> Self {
        self.wait_trigger_speed_mph = self.effective_wait_trigger_mph();
        self.idle_grace_period_seconds = self.effective_grace_seconds();
        self
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        PricingConfig::new(Money::zero(), Money::zero())
    }
}

// =============================================================================
// Flat Rates and Fees
// =============================================================================

/// A fixed-price option offered by the pricing boundary (e.g. "Airport").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct FlatRateOption {
    pub id: String,
    pub label: String,
    pub amount: Money,
}

/// One additional fee line (tolls, airport access, …).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct OtherFee {
    pub label: String,
    pub amount: Money,
}

impl OtherFee {
    pub fn new(label: impl Into<String>, amount: Money) -> Self {
        OtherFee {
            label: label.into(),
            amount,
        }
    }
}

// =============================================================================
// Trip Context
// =============================================================================

/// Driver-entered trip details that the meter itself does not measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct TripContext {
    /// Dispatched booking being completed. `None` for a street hail
    /// (flagdown), which the backend learns about only at completion.
    #[serde(default)]
    pub booking_id: Option<String>,

    #[serde(default = "default_passenger_count")]
    pub passenger_count: u32,

    #[serde(default)]
    pub other_fees: Vec<OtherFee>,

    /// Selected flat-rate option, if the trip is not metered.
    #[serde(default)]
    pub flat_rate: Option<FlatRateOption>,
}

fn default_passenger_count() -> u32 {
    1
}

impl TripContext {
    /// Context for a dispatched booking with one passenger.
    pub fn for_booking(booking_id: impl Into<String>) -> Self {
        TripContext {
            booking_id: Some(booking_id.into()),
            ..Default::default()
        }
    }

    /// Context for a street hail.
    pub fn flagdown() -> Self {
        TripContext::default()
    }

    /// True when this trip has no backend booking yet.
    pub fn is_flagdown(&self) -> bool {
        self.booking_id.is_none()
    }
}

impl Default for TripContext {
    fn default() -> Self {
        TripContext {
            booking_id: None,
            passenger_count: default_passenger_count(),
            other_fees: Vec::new(),
            flat_rate: None,
        }
    }
}

// =============================================================================
// Outbox Kind
// =============================================================================

/// The logical network operation an outbox entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OutboxKind {
    /// Complete an existing dispatched booking.
    StatusUpdate,
    /// Create a driver-initiated booking, then complete it.
    FlagdownThenComplete,
}

impl std::fmt::Display for OutboxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboxKind::StatusUpdate => write!(f, "status_update"),
            OutboxKind::FlagdownThenComplete => write!(f, "flagdown_then_complete"),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiplier_from_factor() {
        assert_eq!(Multiplier::from_factor(1.5).bps(), 15_000);
        assert_eq!(Multiplier::from_factor(f64::NAN).bps(), 0);
        assert!(Multiplier::from_factor(1.01).is_above_one());
        assert!(!Multiplier::one().is_above_one());
    }

    #[test]
    fn test_rounding_mode_serde_names() {
        let json = serde_json::to_string(&RoundingMode::Nearest0_25).unwrap();
        assert_eq!(json, "\"nearest_0.25\"");

        let parsed: RoundingMode = serde_json::from_str("\"nearest_1\"").unwrap();
        assert_eq!(parsed, RoundingMode::Nearest1);
        assert_eq!(parsed.step_cents(), 100);
    }

    #[test]
    fn test_pricing_defaults_from_sparse_json() {
        let json = r#"{"farePerMile": 250, "waitTimePerMinute": 40}"#;
        let config: PricingConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.fare_per_mile.cents(), 250);
        assert_eq!(config.base_fare, Money::zero());
        assert_eq!(config.wait_trigger_speed_mph, 3.0);
        assert_eq!(config.idle_grace_period_seconds, 45.0);
        assert_eq!(config.surge_multiplier, Multiplier::one());
        assert_eq!(config.meter_rounding_mode, RoundingMode::None);
    }

    #[test]
    fn test_effective_knobs_fall_back() {
        let mut config = PricingConfig::default();
        config.wait_trigger_speed_mph = f64::NAN;
        config.idle_grace_period_seconds = -10.0;
        assert_eq!(config.effective_wait_trigger_mph(), 3.0);
        assert_eq!(config.effective_grace_seconds(), 0.0);
    }

    #[test]
    fn test_trip_context_defaults() {
        let ctx: TripContext = serde_json::from_str("{}").unwrap();
        assert!(ctx.is_flagdown());
        assert_eq!(ctx.passenger_count, 1);
        assert!(!TripContext::for_booking("bk-1").is_flagdown());
    }
}
