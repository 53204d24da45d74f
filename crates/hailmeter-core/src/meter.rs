//! # Meter Engine
//!
//! Deterministic state machine that turns a stream of location samples into
//! distance, waiting time and elapsed time for one trip.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Meter States                                    │
//! │                                                                         │
//! │            start                pause                                   │
//! │   ┌──────┐ ─────► ┌─────────┐ ──────► ┌────────┐                        │
//! │   │ Idle │        │ Running │         │ Paused │                        │
//! │   └──────┘        └─────────┘ ◄────── └────────┘                        │
//! │      ▲                 │       resume      │                            │
//! │      │                 │ stop              │ stop                       │
//! │      │                 ▼                   │                            │
//! │      │           ┌───────────┐             │                            │
//! │      └────────── │ Completed │ ◄───────────┘                            │
//! │        reset     └───────────┘                                          │
//! │   (reset is accepted from every state)                                  │
//! │                                                                         │
//! │   Idle and Completed ignore location updates.                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Per-Sample Pipeline (Running only)
//! ```text
//! sample ──► validate ──► Δt (clamped ≥ 0) ──► Δd (haversine)
//!                                                 │
//!                      spike? (Δd > 2 km within < 10 s) ──► Δd = 0
//!                                                 │
//!          distance += Δd ──► effective speed ──► idle / wait accounting
//!                                                 │
//!          thin + cap recent points ──► elapsed += Δt ──► last sample
//! ```
//!
//! ## Wait Accounting
//! While the effective speed stays at or below the wait trigger, an idle
//! anchor marks when the taxi stopped. Each tick bills only the growth of
//! `max(idle − grace, 0)` between the previous and the current tick, so the
//! first `idle_grace_period_seconds` of every stop are free and no second is
//! billed twice.
//!
//! Nothing here reads a clock. Every timestamp arrives inside an event, so
//! replaying the same events always reproduces the same snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::geo::{self, Coordinate};
use crate::types::{LocationSample, PricingConfig};

// =============================================================================
// Constants
// =============================================================================

/// Upper bound on `recent_points`; the oldest points are dropped first.
pub const MAX_POINTS: usize = 500;

/// A new point is kept only if it is farther than this from the last kept one.
pub const MIN_POINT_SPACING_M: f64 = 5.0;

/// Jumps longer than this ...
pub const SPIKE_DISTANCE_M: f64 = 2_000.0;

/// ... arriving faster than this are GPS spikes and bill nothing.
pub const SPIKE_WINDOW_SECONDS: f64 = 10.0;

// =============================================================================
// Meter Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MeterStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
}

impl MeterStatus {
    /// True while a trip is open (running or paused).
    pub fn is_active(&self) -> bool {
        matches!(self, MeterStatus::Running | MeterStatus::Paused)
    }
}

impl fmt::Display for MeterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeterStatus::Idle => write!(f, "idle"),
            MeterStatus::Running => write!(f, "running"),
            MeterStatus::Paused => write!(f, "paused"),
            MeterStatus::Completed => write!(f, "completed"),
        }
    }
}

// =============================================================================
// Meter Snapshot
// =============================================================================

/// The complete, serializable measurement state of one trip.
///
/// ## Invariants
/// - `distance_meters >= 0`
/// - `wait_seconds <= elapsed_seconds`
/// - `recent_points.len() <= MAX_POINTS`
/// - a `Completed` snapshot only changes through a reset
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct MeterSnapshot {
    pub status: MeterStatus,

    pub started_at_ms: i64,

    #[serde(default)]
    pub ended_at_ms: Option<i64>,

    pub elapsed_seconds: f64,

    pub distance_meters: f64,

    pub wait_seconds: f64,

    #[serde(default)]
    pub last_sample: Option<LocationSample>,

    /// Time of the last processed sample, or of start/resume. Never moves
    /// backwards while running.
    pub last_timestamp_ms: i64,

    #[serde(default)]
    pub idle_anchor_ms: Option<i64>,

    #[serde(default)]
    pub paused_at_ms: Option<i64>,

    #[serde(default)]
    pub pricing_config: Option<PricingConfig>,

    /// Thinned trace, newest last.
    #[serde(default)]
    pub recent_points: Vec<Coordinate>,

    #[serde(default)]
    pub last_error: Option<String>,
}

impl MeterSnapshot {
    /// Distance travelled in statute miles.
    pub fn distance_miles(&self) -> f64 {
        geo::meters_to_miles(self.distance_meters)
    }

    /// Billable waiting time in minutes.
    pub fn wait_minutes(&self) -> f64 {
        geo::seconds_to_minutes(self.wait_seconds)
    }

    /// Read-only measurement view for the fare calculator.
    pub fn reading(&self) -> MeterReading {
        MeterReading {
            distance_meters: self.distance_meters,
            distance_miles: self.distance_miles(),
            wait_seconds: self.wait_seconds,
            wait_minutes: self.wait_minutes(),
            elapsed_seconds: self.elapsed_seconds,
        }
    }

    /// Clamps every accumulator back inside its invariant.
    fn enforce_invariants(&mut self) {
        if !self.distance_meters.is_finite() || self.distance_meters < 0.0 {
            self.distance_meters = 0.0;
        }
        if !self.elapsed_seconds.is_finite() || self.elapsed_seconds < 0.0 {
            self.elapsed_seconds = 0.0;
        }
        if !self.wait_seconds.is_finite() || self.wait_seconds < 0.0 {
            self.wait_seconds = 0.0;
        }
        if self.wait_seconds > self.elapsed_seconds {
            self.wait_seconds = self.elapsed_seconds;
        }
        cap_points(&mut self.recent_points);
    }
}

/// Measurements in the units the fare calculator consumes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct MeterReading {
    pub distance_meters: f64,
    pub distance_miles: f64,
    pub wait_seconds: f64,
    pub wait_minutes: f64,
    pub elapsed_seconds: f64,
}

// =============================================================================
// Events and the Transition Function
// =============================================================================

/// Everything that can happen to a meter.
#[derive(Debug, Clone, PartialEq)]
pub enum MeterEvent {
    Start {
        pricing: PricingConfig,
        initial_sample: Option<LocationSample>,
        /// Wall-clock fallback for `started_at_ms` when no fix is available.
        now_ms: i64,
    },
    LocationUpdate(LocationSample),
    Pause {
        at_ms: i64,
    },
    Resume {
        at_ms: i64,
    },
    Stop {
        at_ms: i64,
    },
    Reset,
}

impl MeterEvent {
    fn action(&self) -> &'static str {
        match self {
            MeterEvent::Start { .. } => "start",
            MeterEvent::LocationUpdate(_) => "update location",
            MeterEvent::Pause { .. } => "pause",
            MeterEvent::Resume { .. } => "resume",
            MeterEvent::Stop { .. } => "stop",
            MeterEvent::Reset => "reset",
        }
    }

    fn allowed_from(&self, status: MeterStatus) -> bool {
        match self {
            MeterEvent::Start { .. } => status == MeterStatus::Idle,
            MeterEvent::LocationUpdate(_) | MeterEvent::Pause { .. } => {
                status == MeterStatus::Running
            }
            MeterEvent::Resume { .. } => status == MeterStatus::Paused,
            MeterEvent::Stop { .. } => status.is_active(),
            MeterEvent::Reset => true,
        }
    }
}

/// Pure transition function: returns the snapshot that results from `event`.
///
/// Events that are not allowed from the current status return an unchanged
/// copy. A sample that fails validation leaves every measurement untouched
/// and is reported through `last_error`.
///
/// ## Example
/// ```rust
/// use hailmeter_core::meter::{apply, MeterEvent, MeterSnapshot, MeterStatus};
/// use hailmeter_core::types::PricingConfig;
///
/// let idle = MeterSnapshot::default();
/// let running = apply(&idle, MeterEvent::Start {
///     pricing: PricingConfig::default(),
///     initial_sample: None,
///     now_ms: 1_000,
/// });
/// assert_eq!(running.status, MeterStatus::Running);
/// assert_eq!(running.started_at_ms, 1_000);
/// ```
pub fn apply(snapshot: &MeterSnapshot, event: MeterEvent) -> MeterSnapshot {
    let mut next = snapshot.clone();
    apply_in_place(&mut next, event);
    next
}

/// In-place form of [`apply`]; returns whether the event was accepted.
fn apply_in_place(snapshot: &mut MeterSnapshot, event: MeterEvent) -> bool {
    if !event.allowed_from(snapshot.status) {
        return false;
    }

    match event {
        MeterEvent::Start {
            pricing,
            initial_sample,
            now_ms,
        } => start(snapshot, pricing, initial_sample, now_ms),
        MeterEvent::LocationUpdate(sample) => match process_location(snapshot, &sample) {
            Ok(()) => snapshot.last_error = None,
            Err(err) => snapshot.last_error = Some(err.to_string()),
        },
        MeterEvent::Pause { at_ms } => {
            snapshot.status = MeterStatus::Paused;
            snapshot.idle_anchor_ms = None;
            snapshot.paused_at_ms = Some(at_ms);
        }
        MeterEvent::Resume { at_ms } => {
            snapshot.status = MeterStatus::Running;
            snapshot.paused_at_ms = None;
            snapshot.last_timestamp_ms = at_ms;
            // The first fix after a pause re-anchors distance
            snapshot.last_sample = None;
        }
        MeterEvent::Stop { at_ms } => {
            let elapsed_ms = (at_ms - snapshot.started_at_ms).max(0);
            snapshot.elapsed_seconds = elapsed_ms as f64 / 1000.0;
            snapshot.idle_anchor_ms = None;
            snapshot.paused_at_ms = None;
            snapshot.ended_at_ms = Some(at_ms);
            snapshot.status = MeterStatus::Completed;
        }
        MeterEvent::Reset => *snapshot = MeterSnapshot::default(),
    }

    snapshot.enforce_invariants();
    true
}

fn start(
    snapshot: &mut MeterSnapshot,
    pricing: PricingConfig,
    initial_sample: Option<LocationSample>,
    now_ms: i64,
) {
    let mut last_error = None;
    let initial = match initial_sample {
        Some(sample) => match validate_sample(&sample) {
            Ok(()) => Some(sample),
            Err(err) => {
                last_error = Some(err.to_string());
                None
            }
        },
        None => None,
    };

    let started_at_ms = initial.map(|s| s.timestamp_ms).unwrap_or(now_ms);

    *snapshot = MeterSnapshot {
        status: MeterStatus::Running,
        started_at_ms,
        last_timestamp_ms: started_at_ms,
        last_sample: initial,
        pricing_config: Some(pricing.sanitized()),
        recent_points: initial.map(|s| vec![s.coordinate]).unwrap_or_default(),
        last_error,
        ..MeterSnapshot::default()
    };
}

fn validate_sample(sample: &LocationSample) -> CoreResult<()> {
    sample.coordinate.validate()?;

    if let Some(speed) = sample.speed_mps {
        if !speed.is_finite() {
            return Err(CoreError::InvalidSample(format!("speed {speed} is not finite")));
        }
    }
    if sample.timestamp_ms < 0 {
        return Err(CoreError::InvalidSample(format!(
            "timestamp {} is negative",
            sample.timestamp_ms
        )));
    }
    Ok(())
}

fn is_spike(distance_m: f64, delta_seconds: f64) -> bool {
    distance_m > SPIKE_DISTANCE_M && delta_seconds < SPIKE_WINDOW_SECONDS
}

fn process_location(snapshot: &mut MeterSnapshot, sample: &LocationSample) -> CoreResult<()> {
    validate_sample(sample)?;

    let delta_seconds = (sample.timestamp_ms - snapshot.last_timestamp_ms).max(0) as f64 / 1000.0;

    let raw_distance = snapshot
        .last_sample
        .map(|prev| geo::haversine_meters(&prev.coordinate, &sample.coordinate))
        .filter(|d| d.is_finite())
        .unwrap_or(0.0);
    let spike = is_spike(raw_distance, delta_seconds);
    let delta_distance = if spike { 0.0 } else { raw_distance };

    snapshot.distance_meters += delta_distance;

    // Reported speed wins; derive from the interval only when we have one
    let effective_speed = match sample.speed_mps {
        Some(speed) if speed >= 0.0 => Some(speed),
        _ if snapshot.last_sample.is_some() => geo::speed_mps(delta_distance, delta_seconds),
        _ => None,
    };

    // Out-of-order samples must not rewind the clock
    let now_ms = sample.timestamp_ms.max(snapshot.last_timestamp_ms);

    if let (Some(speed), Some(pricing)) = (effective_speed, snapshot.pricing_config.as_ref()) {
        if geo::is_wait_speed(speed, pricing.effective_wait_trigger_mph()) {
            let grace = pricing.effective_grace_seconds();
            match snapshot.idle_anchor_ms {
                None => snapshot.idle_anchor_ms = Some(now_ms),
                Some(anchor) => {
                    let previous_idle = (snapshot.last_timestamp_ms - anchor).max(0) as f64 / 1000.0;
                    let current_idle = (now_ms - anchor).max(0) as f64 / 1000.0;
                    let billed_before = (previous_idle - grace).max(0.0);
                    let billed_now = (current_idle - grace).max(0.0);
                    snapshot.wait_seconds += (billed_now - billed_before).max(0.0);
                }
            }
        } else {
            snapshot.idle_anchor_ms = None;
        }
    }

    if !spike {
        let far_enough = snapshot
            .recent_points
            .last()
            .map(|last| last.distance_to(&sample.coordinate) > MIN_POINT_SPACING_M)
            .unwrap_or(true);
        if far_enough {
            snapshot.recent_points.push(sample.coordinate);
            cap_points(&mut snapshot.recent_points);
        }
    }

    snapshot.elapsed_seconds += delta_seconds;
    snapshot.last_sample = Some(*sample);
    snapshot.last_timestamp_ms = now_ms;

    Ok(())
}

fn cap_points(points: &mut Vec<Coordinate>) {
    if points.len() > MAX_POINTS {
        let excess = points.len() - MAX_POINTS;
        points.drain(..excess);
    }
}

// =============================================================================
// Meter Engine
// =============================================================================

/// Owns the snapshot of the active trip and applies events to it.
///
/// `revision` increases on every accepted event so persistence layers can
/// tell whether a flush is due without comparing snapshots.
#[derive(Debug, Clone, Default)]
pub struct MeterEngine {
    snapshot: MeterSnapshot,
    revision: u64,
}

impl MeterEngine {
    /// Creates an idle engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores an engine from a persisted snapshot.
    ///
    /// A `Running` snapshot stays running so the caller can re-subscribe to
    /// location updates and keep accumulating on top of the restored totals.
    pub fn hydrate(mut snapshot: MeterSnapshot) -> Self {
        snapshot.enforce_invariants();
        MeterEngine {
            snapshot,
            revision: 0,
        }
    }

    /// Restores an engine from [`MeterEngine::to_json`] output.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let snapshot: MeterSnapshot =
            serde_json::from_str(json).map_err(|e| CoreError::SnapshotDecode(e.to_string()))?;
        Ok(Self::hydrate(snapshot))
    }

    /// Serializes the full snapshot.
    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string(&self.snapshot).map_err(|e| CoreError::SnapshotDecode(e.to_string()))
    }

    pub fn snapshot(&self) -> &MeterSnapshot {
        &self.snapshot
    }

    pub fn status(&self) -> MeterStatus {
        self.snapshot.status
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn reading(&self) -> MeterReading {
        self.snapshot.reading()
    }

    /// Applies any event; returns whether it was accepted.
    pub fn apply(&mut self, event: MeterEvent) -> bool {
        let accepted = apply_in_place(&mut self.snapshot, event);
        if accepted {
            self.revision += 1;
        }
        accepted
    }

    /// Starts a trip. Only allowed from `Idle`.
    pub fn start(
        &mut self,
        pricing: PricingConfig,
        initial_sample: Option<LocationSample>,
        now_ms: i64,
    ) -> CoreResult<()> {
        self.apply_strict(MeterEvent::Start {
            pricing,
            initial_sample,
            now_ms,
        })
    }

    /// Feeds one sample. Ignored unless `Running`.
    pub fn location_update(&mut self, sample: LocationSample) -> bool {
        self.apply(MeterEvent::LocationUpdate(sample))
    }

    pub fn pause(&mut self, at_ms: i64) -> bool {
        self.apply(MeterEvent::Pause { at_ms })
    }

    pub fn resume(&mut self, at_ms: i64) -> bool {
        self.apply(MeterEvent::Resume { at_ms })
    }

    /// Finishes the trip. Only allowed from `Running` or `Paused`.
    pub fn stop(&mut self, at_ms: i64) -> CoreResult<()> {
        self.apply_strict(MeterEvent::Stop { at_ms })
    }

    pub fn reset(&mut self) {
        self.apply(MeterEvent::Reset);
    }

    fn apply_strict(&mut self, event: MeterEvent) -> CoreResult<()> {
        let from = self.snapshot.status;
        let action = event.action();
        if self.apply(event) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                from,
                action: action.to_string(),
            })
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::EARTH_RADIUS_M;
    use crate::money::Money;
    use std::f64::consts::PI;

    const T0: i64 = 1_700_000_000_000;

    fn origin() -> Coordinate {
        Coordinate::new(40.7580, -73.9855).unwrap()
    }

    fn north_of(base: Coordinate, meters: f64) -> Coordinate {
        Coordinate {
            latitude: base.latitude + meters * 180.0 / (PI * EARTH_RADIUS_M),
            longitude: base.longitude,
        }
    }

    fn pricing(grace_seconds: f64) -> PricingConfig {
        let mut config = PricingConfig::new(Money::from_cents(250), Money::from_cents(50));
        config.idle_grace_period_seconds = grace_seconds;
        config
    }

    fn sample_at(coordinate: Coordinate, offset_s: f64) -> LocationSample {
        LocationSample::new(coordinate, T0 + (offset_s * 1000.0) as i64)
    }

    fn started(grace_seconds: f64) -> MeterEngine {
        let mut engine = MeterEngine::new();
        engine
            .start(pricing(grace_seconds), Some(sample_at(origin(), 0.0)), T0)
            .unwrap();
        engine
    }

    #[test]
    fn test_start_initializes_from_initial_sample() {
        let engine = started(45.0);
        let snap = engine.snapshot();
        assert_eq!(snap.status, MeterStatus::Running);
        assert_eq!(snap.started_at_ms, T0);
        assert_eq!(snap.recent_points.len(), 1);
        assert_eq!(snap.distance_meters, 0.0);
        assert!(snap.pricing_config.is_some());
    }

    #[test]
    fn test_start_without_fix_uses_wall_clock_and_defers_distance() {
        let mut engine = MeterEngine::new();
        engine.start(pricing(45.0), None, T0 + 500).unwrap();
        assert_eq!(engine.snapshot().started_at_ms, T0 + 500);
        assert!(engine.snapshot().recent_points.is_empty());

        // First fix anchors distance, it does not bill from nowhere
        engine.location_update(sample_at(origin(), 2.0));
        assert_eq!(engine.snapshot().distance_meters, 0.0);
        assert_eq!(engine.snapshot().elapsed_seconds, 1.5);

        engine.location_update(sample_at(north_of(origin(), 20.0), 4.0));
        assert!((engine.snapshot().distance_meters - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mut engine = started(45.0);
        let err = engine.start(pricing(45.0), None, T0).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidTransition {
                from: MeterStatus::Running,
                ..
            }
        ));
    }

    #[test]
    fn test_idle_meter_ignores_location_updates() {
        let mut engine = MeterEngine::new();
        assert!(!engine.location_update(sample_at(origin(), 1.0)));
        assert_eq!(engine.snapshot(), &MeterSnapshot::default());
        assert_eq!(engine.revision(), 0);
    }

    #[test]
    fn test_distance_accumulates() {
        let mut engine = started(45.0);
        for i in 1..=10 {
            engine.location_update(sample_at(north_of(origin(), 15.0 * i as f64), i as f64));
        }
        let snap = engine.snapshot();
        assert!((snap.distance_meters - 150.0).abs() < 1e-6);
        assert_eq!(snap.elapsed_seconds, 10.0);
        assert_eq!(snap.recent_points.len(), 11);
    }

    #[test]
    fn test_spike_within_window_is_discarded() {
        let mut engine = started(45.0);
        engine.location_update(sample_at(north_of(origin(), 3_000.0), 5.0));
        assert_eq!(engine.snapshot().distance_meters, 0.0);
        assert_eq!(engine.snapshot().recent_points.len(), 1);
    }

    #[test]
    fn test_long_jump_after_window_is_billed() {
        let mut engine = started(45.0);
        engine.location_update(sample_at(north_of(origin(), 3_000.0), 120.0));
        assert!((engine.snapshot().distance_meters - 3_000.0).abs() < 1e-3);
    }

    #[test]
    fn test_spike_thresholds_are_strict() {
        assert!(is_spike(2_000.1, 5.0));
        assert!(!is_spike(SPIKE_DISTANCE_M, 5.0));
        assert!(is_spike(3_000.0, 9.99));
        assert!(!is_spike(3_000.0, SPIKE_WINDOW_SECONDS));
        assert!(!is_spike(1_999.0, 0.5));
    }

    #[test]
    fn test_jump_just_inside_window_is_discarded() {
        let mut engine = started(45.0);
        let far = north_of(origin(), 2_001.0);
        engine.location_update(LocationSample::new(far, T0 + 9_990));
        assert_eq!(engine.snapshot().distance_meters, 0.0);
        assert_eq!(engine.snapshot().recent_points.len(), 1);
    }

    #[test]
    fn test_jump_at_window_edge_is_billed() {
        let mut engine = started(45.0);
        let far = north_of(origin(), 2_001.0);
        engine.location_update(LocationSample::new(far, T0 + 10_000));
        assert!((engine.snapshot().distance_meters - 2_001.0).abs() < 1e-3);
        assert_eq!(engine.snapshot().recent_points.len(), 2);
    }

    #[test]
    fn test_jump_under_distance_ceiling_is_billed() {
        let mut engine = started(45.0);
        engine.location_update(sample_at(north_of(origin(), 1_999.0), 1.0));
        assert!((engine.snapshot().distance_meters - 1_999.0).abs() < 1e-3);
    }

    #[test]
    fn test_idle_within_grace_bills_nothing() {
        let mut engine = started(45.0);
        engine.location_update(sample_at(origin(), 1.0).with_speed(0.0));
        engine.location_update(sample_at(origin(), 46.0).with_speed(0.0));
        assert_eq!(engine.snapshot().wait_seconds, 0.0);
    }

    #[test]
    fn test_idle_of_105_seconds_bills_60() {
        let mut engine = started(45.0);
        engine.location_update(sample_at(origin(), 1.0).with_speed(0.0));
        engine.location_update(sample_at(origin(), 106.0).with_speed(0.0));
        assert_eq!(engine.snapshot().wait_seconds, 60.0);
    }

    #[test]
    fn test_incremental_wait_matches_single_step() {
        let mut engine = started(45.0);
        engine.location_update(sample_at(origin(), 1.0).with_speed(0.0));
        for step in 1..=21 {
            engine.location_update(sample_at(origin(), 1.0 + 5.0 * step as f64).with_speed(0.0));
        }
        // 105 s idle, 45 s grace
        assert_eq!(engine.snapshot().wait_seconds, 60.0);
    }

    #[test]
    fn test_movement_clears_idle_anchor() {
        let mut engine = started(45.0);
        engine.location_update(sample_at(origin(), 1.0).with_speed(0.0));
        engine.location_update(sample_at(origin(), 31.0).with_speed(0.0));
        engine.location_update(sample_at(north_of(origin(), 100.0), 41.0).with_speed(10.0));
        assert_eq!(engine.snapshot().idle_anchor_ms, None);

        let here = north_of(origin(), 100.0);
        engine.location_update(sample_at(here, 42.0).with_speed(0.0));
        engine.location_update(sample_at(here, 72.0).with_speed(0.0));
        // Two 30 s stops, each inside the grace period
        assert_eq!(engine.snapshot().wait_seconds, 0.0);
    }

    #[test]
    fn test_derived_speed_detects_waiting() {
        let mut engine = started(0.0);
        // 1 m per 10 s without a reported speed is crawling
        engine.location_update(sample_at(north_of(origin(), 1.0), 10.0));
        engine.location_update(sample_at(north_of(origin(), 2.0), 20.0));
        assert!((engine.snapshot().wait_seconds - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_reported_speed_falls_back_to_derived() {
        let mut engine = started(0.0);
        engine.location_update(sample_at(north_of(origin(), 200.0), 10.0).with_speed(-1.0));
        // 20 m/s derived, not waiting
        assert_eq!(engine.snapshot().idle_anchor_ms, None);
    }

    #[test]
    fn test_out_of_order_sample_is_tolerated() {
        let mut engine = started(0.0);
        engine.location_update(sample_at(origin(), 10.0).with_speed(0.0));
        engine.location_update(sample_at(origin(), 20.0).with_speed(0.0));
        let before = engine.snapshot().clone();

        engine.location_update(sample_at(origin(), 5.0).with_speed(0.0));
        let after = engine.snapshot();
        assert_eq!(after.elapsed_seconds, before.elapsed_seconds);
        assert_eq!(after.wait_seconds, before.wait_seconds);
        assert_eq!(after.last_timestamp_ms, before.last_timestamp_ms);
        assert!(after.last_error.is_none());
    }

    #[test]
    fn test_invalid_sample_is_recorded_not_applied() {
        let mut engine = started(45.0);
        let bad = LocationSample::new(
            Coordinate {
                latitude: f64::NAN,
                longitude: 0.0,
            },
            T0 + 1_000,
        );
        engine.location_update(bad);

        let snap = engine.snapshot();
        assert!(snap.last_error.is_some());
        assert_eq!(snap.elapsed_seconds, 0.0);
        assert_eq!(snap.last_timestamp_ms, T0);

        engine.location_update(sample_at(north_of(origin(), 10.0), 2.0));
        assert!(engine.snapshot().last_error.is_none());
    }

    #[test]
    fn test_non_finite_speed_is_rejected() {
        let mut engine = started(45.0);
        engine.location_update(sample_at(origin(), 1.0).with_speed(f64::NAN));
        assert!(engine
            .snapshot()
            .last_error
            .as_deref()
            .unwrap()
            .contains("speed"));
    }

    #[test]
    fn test_point_thinning() {
        let mut engine = started(45.0);
        engine.location_update(sample_at(north_of(origin(), 3.0), 1.0));
        engine.location_update(sample_at(north_of(origin(), 4.5), 2.0));
        assert_eq!(engine.snapshot().recent_points.len(), 1);

        engine.location_update(sample_at(north_of(origin(), 9.0), 3.0));
        assert_eq!(engine.snapshot().recent_points.len(), 2);
    }

    #[test]
    fn test_recent_points_are_capped() {
        let mut engine = started(45.0);
        let n = MAX_POINTS + 250;
        for i in 1..=n {
            engine.location_update(sample_at(north_of(origin(), 10.0 * i as f64), i as f64));
        }
        let snap = engine.snapshot();
        assert_eq!(snap.recent_points.len(), MAX_POINTS);
        // Newest last
        let newest = snap.recent_points.last().unwrap();
        assert!((newest.distance_to(&north_of(origin(), 10.0 * n as f64))).abs() < 1e-6);
    }

    #[test]
    fn test_pause_and_resume_skip_the_paused_interval() {
        let mut engine = started(45.0);
        engine.location_update(sample_at(north_of(origin(), 50.0), 5.0));
        assert!(engine.pause(T0 + 6_000));
        assert_eq!(engine.status(), MeterStatus::Paused);

        // Ignored while paused
        assert!(!engine.location_update(sample_at(north_of(origin(), 500.0), 30.0)));

        assert!(engine.resume(T0 + 60_000));
        engine.location_update(sample_at(north_of(origin(), 800.0), 61.0));
        engine.location_update(sample_at(north_of(origin(), 820.0), 62.0));

        let snap = engine.snapshot();
        assert!((snap.distance_meters - 70.0).abs() < 1e-6);
        assert_eq!(snap.elapsed_seconds, 7.0);
    }

    #[test]
    fn test_pause_does_not_zero_totals() {
        let mut engine = started(45.0);
        engine.location_update(sample_at(north_of(origin(), 50.0), 5.0));
        let distance = engine.snapshot().distance_meters;
        engine.pause(T0 + 6_000);
        assert_eq!(engine.snapshot().distance_meters, distance);
        assert_eq!(engine.snapshot().paused_at_ms, Some(T0 + 6_000));
    }

    #[test]
    fn test_stop_finalizes_and_freezes() {
        let mut engine = started(45.0);
        engine.location_update(sample_at(north_of(origin(), 50.0), 5.0));
        engine.stop(T0 + 90_000).unwrap();

        let frozen = engine.snapshot().clone();
        assert_eq!(frozen.status, MeterStatus::Completed);
        assert_eq!(frozen.elapsed_seconds, 90.0);
        assert_eq!(frozen.ended_at_ms, Some(T0 + 90_000));

        assert!(!engine.location_update(sample_at(north_of(origin(), 900.0), 95.0)));
        assert!(!engine.pause(T0 + 96_000));
        assert!(engine.stop(T0 + 99_000).is_err());
        assert_eq!(engine.snapshot(), &frozen);
    }

    #[test]
    fn test_stop_from_paused() {
        let mut engine = started(45.0);
        engine.pause(T0 + 1_000);
        assert!(engine.stop(T0 + 2_000).is_ok());
        assert_eq!(engine.status(), MeterStatus::Completed);
    }

    #[test]
    fn test_stop_before_start_time_clamps() {
        let mut engine = started(0.0);
        engine.location_update(sample_at(origin(), 1.0).with_speed(0.0));
        engine.location_update(sample_at(origin(), 30.0).with_speed(0.0));
        engine.stop(T0 - 5_000).unwrap();
        let snap = engine.snapshot();
        assert_eq!(snap.elapsed_seconds, 0.0);
        assert!(snap.wait_seconds <= snap.elapsed_seconds);
    }

    #[test]
    fn test_reset_from_any_state() {
        let mut engine = started(45.0);
        engine.reset();
        assert_eq!(engine.snapshot(), &MeterSnapshot::default());

        let mut engine = started(45.0);
        engine.stop(T0 + 1_000).unwrap();
        engine.reset();
        assert_eq!(engine.status(), MeterStatus::Idle);
        assert!(engine.start(pricing(45.0), None, T0).is_ok());
    }

    #[test]
    fn test_hydrated_engine_continues_identically() {
        let mut live = started(45.0);
        live.location_update(sample_at(north_of(origin(), 40.0), 4.0));
        live.location_update(sample_at(north_of(origin(), 40.0), 5.0).with_speed(0.0));
        live.location_update(sample_at(north_of(origin(), 40.0), 80.0).with_speed(0.0));

        let json = live.to_json().unwrap();
        let mut restored = MeterEngine::from_json(&json).unwrap();
        assert_eq!(restored.status(), MeterStatus::Running);
        assert_eq!(restored.snapshot().distance_meters, live.snapshot().distance_meters);
        assert_eq!(restored.snapshot().wait_seconds, live.snapshot().wait_seconds);

        let next = sample_at(north_of(origin(), 40.0), 130.0).with_speed(0.0);
        live.location_update(next);
        restored.location_update(next);
        assert_eq!(restored.snapshot(), live.snapshot());
        assert_eq!(restored.snapshot().wait_seconds, 85.0);
    }

    #[test]
    fn test_non_finite_pricing_knobs_survive_persistence() {
        let mut config = pricing(f64::INFINITY);
        config.wait_trigger_speed_mph = f64::NAN;
        let mut engine = MeterEngine::new();
        engine.start(config, Some(sample_at(origin(), 0.0)), T0).unwrap();

        let stored = engine.snapshot().pricing_config.clone().unwrap();
        assert_eq!(stored.wait_trigger_speed_mph, 3.0);
        assert_eq!(stored.idle_grace_period_seconds, 0.0);

        assert!(!serde_json::to_string(&stored).unwrap().contains("null"));

        let json = engine.to_json().unwrap();
        let restored = MeterEngine::from_json(&json).unwrap();
        assert_eq!(restored.snapshot(), engine.snapshot());
    }

    #[test]
    fn test_hydrate_caps_recent_points() {
        let mut snapshot = started(45.0).snapshot().clone();
        snapshot.recent_points = (0..MAX_POINTS + 40)
            .map(|i| north_of(origin(), i as f64 * 10.0))
            .collect();
        let engine = MeterEngine::hydrate(snapshot);
        assert_eq!(engine.snapshot().recent_points.len(), MAX_POINTS);
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        assert!(matches!(
            MeterEngine::from_json("{not json"),
            Err(CoreError::SnapshotDecode(_))
        ));
    }

    #[test]
    fn test_pure_apply_does_not_touch_input() {
        let idle = MeterSnapshot::default();
        let running = apply(
            &idle,
            MeterEvent::Start {
                pricing: pricing(45.0),
                initial_sample: None,
                now_ms: T0,
            },
        );
        assert_eq!(idle.status, MeterStatus::Idle);
        assert_eq!(running.status, MeterStatus::Running);

        let unchanged = apply(&idle, MeterEvent::Resume { at_ms: T0 });
        assert_eq!(unchanged, idle);
    }

    #[test]
    fn test_invariants_hold_for_noisy_streams() {
        // Deterministic LCG so the stream is reproducible
        let mut state: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = move || {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            (state >> 33) as f64 / (1u64 << 31) as f64
        };

        for _ in 0..20 {
            let mut engine = started(next() * 60.0);
            let mut t = 0.0;
            for _ in 0..400 {
                // Jitter time backwards occasionally, jump occasionally
                t += next() * 12.0 - 2.0;
                let meters = next() * 4_000.0;
                let mut sample = sample_at(north_of(origin(), meters), t);
                if next() < 0.5 {
                    sample = sample.with_speed(next() * 3.0 - 0.5);
                }
                engine.location_update(sample);
                if next() < 0.02 {
                    engine.pause(T0 + (t * 1000.0) as i64);
                    engine.resume(T0 + (t * 1000.0) as i64 + 500);
                }

                let snap = engine.snapshot();
                assert!(snap.distance_meters >= 0.0);
                assert!(snap.wait_seconds <= snap.elapsed_seconds);
                assert!(snap.recent_points.len() <= MAX_POINTS);
            }
        }
    }
}
