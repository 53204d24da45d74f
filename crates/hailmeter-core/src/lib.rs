//! # hailmeter-core: Pure Metering Logic for Hailmeter
//!
//! This crate measures a taxi trip and prices it. It has no I/O: no clock,
//! no database, no network. Every timestamp arrives inside an event.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Hailmeter Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Driver app / meter-cli                          │   │
//! │  │     start trip ──► live fare ──► end trip ──► summary           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          hailmeter-sync (TripController, SubmissionPipeline)    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ hailmeter-core (THIS CRATE) ★                   │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │    geo    │  │   meter   │  │   fare    │  │   money   │  │   │
//! │  │   │ haversine │  │MeterEngine│  │compute_   │  │   Money   │  │   │
//! │  │   │   units   │  │ snapshot  │  │  fare     │  │Multiplier │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO CLOCK • NO NETWORK • DETERMINISTIC               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          hailmeter-db (active trip snapshot, outbox)            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`geo`] - Coordinates, haversine distance, unit conversions
//! - [`meter`] - The meter state machine and its serializable snapshot
//! - [`fare`] - Fare breakdown computation
//! - [`money`] - Money type with integer arithmetic
//! - [`types`] - Pricing config, trip context, location samples
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use hailmeter_core::{compute_fare, Coordinate, LocationSample, MeterEngine, Money, PricingConfig};
//!
//! let pricing = PricingConfig::new(Money::from_cents(250), Money::from_cents(50));
//! let start = Coordinate::new(40.7580, -73.9855).unwrap();
//! let end = Coordinate::new(40.7680, -73.9855).unwrap();
//!
//! let mut meter = MeterEngine::new();
//! meter.start(pricing.clone(), Some(LocationSample::new(start, 0)), 0).unwrap();
//! meter.location_update(LocationSample::new(end, 120_000));
//! meter.stop(120_000).unwrap();
//!
//! let reading = meter.reading();
//! let fare = compute_fare(&pricing, reading.distance_miles, reading.wait_minutes, 1, &[], None);
//! assert!(fare.total.is_positive());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod fare;
pub mod geo;
pub mod meter;
pub mod money;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult};
pub use fare::{compute_fare, fare_for_trip, FareBreakdown, FareMode};
pub use geo::{haversine_meters, Coordinate};
pub use meter::{
    apply, MeterEngine, MeterEvent, MeterReading, MeterSnapshot, MeterStatus, MAX_POINTS,
};
pub use money::Money;
pub use types::*;
