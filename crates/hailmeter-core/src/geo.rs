//! # Geo Math
//!
//! Stateless distance and unit-conversion helpers used by the meter.
//!
//! Distances are great-circle (haversine) on a spherical Earth. Road snapping
//! is deliberately absent: the meter bills what the GPS trace measures.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::CoreError;

// =============================================================================
// Constants
// =============================================================================

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Metres in one statute mile.
pub const METERS_PER_MILE: f64 = 1_609.344;

/// Metres per second in one mile per hour.
pub const MPS_PER_MPH: f64 = METERS_PER_MILE / 3_600.0;

// =============================================================================
// Coordinate
// =============================================================================

/// A point on the Earth's surface in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Creates a validated coordinate.
    ///
    /// ## Example
    /// ```rust
    /// use hailmeter_core::geo::Coordinate;
    ///
    /// assert!(Coordinate::new(40.7580, -73.9855).is_ok());
    /// assert!(Coordinate::new(f64::NAN, 0.0).is_err());
    /// assert!(Coordinate::new(91.0, 0.0).is_err());
    /// ```
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoreError> {
        let coordinate = Coordinate {
            latitude,
            longitude,
        };
        coordinate.validate()?;
        Ok(coordinate)
    }

    /// Checks that both axes are finite and inside their ranges.
    ///
    /// Deserialized coordinates bypass [`Coordinate::new`], so the meter calls
    /// this on every incoming sample.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err(CoreError::InvalidCoordinate {
                latitude: self.latitude,
                longitude: self.longitude,
                reason: "non-finite value".to_string(),
            });
        }
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude)
        {
            return Err(CoreError::InvalidCoordinate {
                latitude: self.latitude,
                longitude: self.longitude,
                reason: "out of range".to_string(),
            });
        }
        Ok(())
    }

    /// Great-circle distance to `other` in metres.
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        haversine_meters(self, other)
    }
}

// =============================================================================
// Distance
// =============================================================================

/// Haversine distance between two coordinates in metres.
///
/// ## Example
/// ```rust
/// use hailmeter_core::geo::{haversine_meters, Coordinate};
///
/// let a = Coordinate::new(0.0, 0.0).unwrap();
/// let b = Coordinate::new(0.0, 1.0).unwrap();
/// let d = haversine_meters(&a, &b);
/// assert!((d - 111_195.0).abs() < 1.0); // one degree of longitude at the equator
/// ```
pub fn haversine_meters(from: &Coordinate, to: &Coordinate) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let delta_lat = (to.latitude - from.latitude).to_radians();
    let delta_lng = (to.longitude - from.longitude).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);
    // Clamp guards asin against a slightly-above-one argument from rounding
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

// =============================================================================
// Unit Conversions
// =============================================================================

#[inline]
pub fn meters_to_miles(meters: f64) -> f64 {
    meters / METERS_PER_MILE
}

#[inline]
pub fn miles_to_meters(miles: f64) -> f64 {
    miles * METERS_PER_MILE
}

#[inline]
pub fn mph_to_mps(mph: f64) -> f64 {
    mph * MPS_PER_MPH
}

#[inline]
pub fn mps_to_mph(mps: f64) -> f64 {
    mps / MPS_PER_MPH
}

#[inline]
pub fn seconds_to_minutes(seconds: f64) -> f64 {
    seconds / 60.0
}

/// Average speed over an interval, `None` when the interval has no duration.
pub fn speed_mps(distance_m: f64, delta_seconds: f64) -> Option<f64> {
    if delta_seconds > 0.0 && distance_m.is_finite() {
        Some(distance_m / delta_seconds)
    } else {
        None
    }
}

/// True when `speed_mps` counts as waiting under a threshold given in mph.
#[inline]
pub fn is_wait_speed(speed_mps: f64, threshold_mph: f64) -> bool {
    speed_mps <= mph_to_mps(threshold_mph)
}
