//! # Trip Controller
//!
//! Turns driver intent into meter transitions, persists the meter, prices
//! the trip, and hands the result to the submission pipeline.
//!
//! ## Trip Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  hydrate() ── restores the persisted trip after a restart              │
//! │                                                                         │
//! │  start_trip(pricing, context)                                          │
//! │     │  first fix (bounded wait, may be none) → meter Running → flush    │
//! │     ▼                                                                   │
//! │  run(subscription) ── samples → meter;  every snapshot_flush_ms → flush│
//! │     │  pause() / resume() / background() flush immediately              │
//! │     ▼                                                                   │
//! │  end_trip()                                                            │
//! │     1. fresh fix (bounded), else last known                            │
//! │     2. meter Completed → flush                                         │
//! │     3. compute fare                                                    │
//! │     4. submit now, or save to the outbox                               │
//! │     5. clear the persisted slot, arm the summary                       │
//! │                                                                         │
//! │  take_summary(trip_id) ── Some(summary) exactly once per trip          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All meter access goes through one async mutex, so the engine sees a
//! single ordered stream of events. `end_trip` holds it from stop to
//! settlement: a racing second `end_trip` finds no trip.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hailmeter_core::{
    fare_for_trip, CoreError, FareBreakdown, LocationSample, MeterEngine, MeterSnapshot,
    MeterStatus, PricingConfig, TripContext,
};
use hailmeter_db::{ActiveTrip, Database, DbError};

use crate::auth::CredentialSource;
use crate::config::MeterSettings;
use crate::error::{SyncError, SyncResult};
use crate::location::{LocationProvider, LocationSubscription};
use crate::outbox::{Delivery, SubmissionPipeline};
use crate::submission::Submission;

// =============================================================================
// Results
// =============================================================================

/// The recap shown to the driver after a trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripSummary {
    pub trip_id: String,
    pub context: TripContext,
    pub snapshot: MeterSnapshot,
    pub fare: FareBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripOutcome {
    pub summary: TripSummary,
    pub delivery: Delivery,
}

// =============================================================================
// Controller State
// =============================================================================

#[derive(Debug, Clone)]
struct TripMeta {
    trip_id: String,
    context: TripContext,
}

#[derive(Default)]
struct ControllerState {
    engine: MeterEngine,
    trip: Option<TripMeta>,
    /// Engine revision last written to the active trip slot.
    flushed_revision: Option<u64>,
    /// Recap of the last finished trip, until it is taken.
    pending_summary: Option<TripSummary>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// =============================================================================
// Trip Controller
// =============================================================================

pub struct TripController {
    db: Database,
    pipeline: Arc<SubmissionPipeline>,
    location: Arc<dyn LocationProvider>,
    credentials: Arc<dyn CredentialSource>,
    settings: MeterSettings,
    driver_id: Option<String>,
    state: Mutex<ControllerState>,
}

impl TripController {
    pub fn new(
        db: Database,
        pipeline: Arc<SubmissionPipeline>,
        location: Arc<dyn LocationProvider>,
        credentials: Arc<dyn CredentialSource>,
        settings: MeterSettings,
    ) -> Self {
        TripController {
            db,
            pipeline,
            location,
            credentials,
            settings,
            driver_id: None,
            state: Mutex::new(ControllerState::default()),
        }
    }

    /// Sets the driver id sent with every completion.
    pub fn with_driver_id(mut self, driver_id: Option<String>) -> Self {
        self.driver_id = driver_id;
        self
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn status(&self) -> MeterStatus {
        self.state.lock().await.engine.status()
    }

    pub async fn snapshot(&self) -> MeterSnapshot {
        self.state.lock().await.engine.snapshot().clone()
    }

    pub async fn trip_id(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .trip
            .as_ref()
            .map(|t| t.trip_id.clone())
    }

    /// Fare for the trip so far, priced exactly as `end_trip` would.
    pub async fn live_fare(&self) -> Option<FareBreakdown> {
        let state = self.state.lock().await;
        let trip = state.trip.as_ref()?;
        let pricing = state.engine.snapshot().pricing_config.as_ref()?;
        Some(fare_for_trip(pricing, &state.engine.reading(), &trip.context))
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Restores the persisted trip, if any, and returns the meter status.
    ///
    /// When this returns `Running` the caller should subscribe to location
    /// again and call [`TripController::run`]. `Completed` means the process
    /// died while settling; `end_trip` finishes the job.
    pub async fn hydrate(&self) -> SyncResult<MeterStatus> {
        let mut state = self.state.lock().await;

        let active = match self.db.active_trip().load().await {
            Ok(active) => active,
            Err(DbError::Serialization(e)) => {
                warn!(error = %e, "Discarding unreadable persisted trip");
                self.db.active_trip().clear().await?;
                None
            }
            Err(e) => return Err(e.into()),
        };

        let Some(active) = active else {
            debug!("No persisted trip");
            return Ok(state.engine.status());
        };

        state.engine = MeterEngine::hydrate(active.snapshot);
        state.flushed_revision = Some(state.engine.revision());
        state.pending_summary = None;
        state.trip = Some(TripMeta {
            trip_id: active.trip_id,
            context: active.context,
        });

        let status = state.engine.status();
        info!(
            trip_id = ?state.trip.as_ref().map(|t| &t.trip_id),
            status = %status,
            distance_m = state.engine.snapshot().distance_meters,
            "Trip restored"
        );
        Ok(status)
    }

    // =========================================================================
    // Driver Actions
    // =========================================================================

    /// Starts a trip and returns its id.
    ///
    /// Waits at most `start_fix_timeout_ms` for a first fix. Without one the
    /// trip starts anyway and distance accrues from the first sample.
    pub async fn start_trip(&self, pricing: PricingConfig, context: TripContext) -> SyncResult<String> {
        {
            let state = self.state.lock().await;
            let status = state.engine.status();
            if status.is_active() || (status == MeterStatus::Completed && state.trip.is_some()) {
                return Err(CoreError::InvalidTransition {
                    from: status,
                    action: "start".into(),
                }
                .into());
            }
        }

        let fix = self.fresh_fix(self.settings.start_fix_timeout()).await;
        if fix.is_none() {
            info!("No location fix yet, starting without one");
        }

        let mut state = self.state.lock().await;
        // A settled trip stays on the meter for display until the next start
        if state.engine.status() == MeterStatus::Completed && state.trip.is_none() {
            state.engine.reset();
        }
        state.engine.start(pricing, fix, now_ms())?;

        let trip_id = Uuid::new_v4().to_string();
        state.trip = Some(TripMeta {
            trip_id: trip_id.clone(),
            context,
        });
        state.pending_summary = None;
        self.flush_locked(&mut state).await?;

        info!(trip_id = %trip_id, with_fix = fix.is_some(), "Trip started");
        Ok(trip_id)
    }

    /// Pauses metering. Returns whether the meter accepted it.
    pub async fn pause(&self) -> SyncResult<bool> {
        let mut state = self.state.lock().await;
        if state.trip.is_none() {
            return Err(SyncError::NoActiveTrip);
        }
        let accepted = state.engine.pause(now_ms());
        if accepted {
            self.flush_locked(&mut state).await?;
        }
        Ok(accepted)
    }

    /// Resumes metering. Returns whether the meter accepted it.
    pub async fn resume(&self) -> SyncResult<bool> {
        let mut state = self.state.lock().await;
        if state.trip.is_none() {
            return Err(SyncError::NoActiveTrip);
        }
        let accepted = state.engine.resume(now_ms());
        if accepted {
            self.flush_locked(&mut state).await?;
        }
        Ok(accepted)
    }

    /// Flushes the snapshot now (the app is going to the background).
    pub async fn background(&self) -> SyncResult<bool> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await
    }

    /// Finishes the trip: final fix, stop, price, submit or save locally.
    ///
    /// Network trouble is never an error here; the outcome says whether the
    /// trip went out or waits in the outbox.
    pub async fn end_trip(&self) -> SyncResult<TripOutcome> {
        let already_stopped = {
            let state = self.state.lock().await;
            if state.trip.is_none() {
                return Err(SyncError::NoActiveTrip);
            }
            state.engine.status() == MeterStatus::Completed
        };

        let fresh = if already_stopped {
            None
        } else {
            self.fresh_fix(self.settings.end_fix_timeout()).await
        };

        let mut state = self.state.lock().await;
        let Some(trip) = state.trip.clone() else {
            return Err(SyncError::NoActiveTrip);
        };

        if state.engine.status() != MeterStatus::Completed {
            if let Some(fix) = fresh.or_else(|| self.location.last_known()) {
                state.engine.location_update(fix);
            }
            let stop_at = fresh.map(|f| f.timestamp_ms).unwrap_or_else(now_ms);
            state.engine.stop(stop_at)?;
        }
        self.flush_locked(&mut state).await?;

        let snapshot = state.engine.snapshot().clone();
        let pricing = snapshot.pricing_config.clone().unwrap_or_default();
        let fare = fare_for_trip(&pricing, &snapshot.reading(), &trip.context);

        let submission = Submission::for_trip(
            &trip.trip_id,
            &trip.context,
            &snapshot,
            &fare,
            self.driver_id.as_deref(),
        );
        let token = self.credentials.current_token();
        let delivery = self.pipeline.submit_now(token.as_deref(), submission).await?;

        self.db.active_trip().clear().await?;
        state.trip = None;
        state.flushed_revision = None;

        let summary = TripSummary {
            trip_id: trip.trip_id,
            context: trip.context,
            snapshot,
            fare,
        };
        state.pending_summary = Some(summary.clone());

        info!(
            trip_id = %summary.trip_id,
            total = %summary.fare.total,
            distance_m = summary.snapshot.distance_meters,
            wait_s = summary.snapshot.wait_seconds,
            ?delivery,
            "Trip ended"
        );
        Ok(TripOutcome { summary, delivery })
    }

    /// Hands out the recap of `trip_id` once; later calls get `None`.
    pub async fn take_summary(&self, trip_id: &str) -> Option<TripSummary> {
        let mut state = self.state.lock().await;
        match state.pending_summary {
            Some(ref summary) if summary.trip_id == trip_id => state.pending_summary.take(),
            _ => None,
        }
    }

    /// Clears the meter, the persisted trip and the summary guard.
    pub async fn reset(&self) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        state.engine.reset();
        state.trip = None;
        state.flushed_revision = None;
        state.pending_summary = None;
        self.db.active_trip().clear().await?;
        info!("Meter reset");
        Ok(())
    }

    // =========================================================================
    // Location Loop
    // =========================================================================

    /// Feeds samples to the meter until the subscription ends or the trip
    /// is no longer open, flushing every `snapshot_flush_ms` and once more
    /// on exit.
    pub async fn run(&self, mut subscription: LocationSubscription) -> SyncResult<()> {
        let mut flush = tokio::time::interval(self.settings.snapshot_flush());
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        flush.tick().await;

        let mut samples = 0usize;
        loop {
            tokio::select! {
                sample = subscription.next() => {
                    let Some(sample) = sample else {
                        debug!("Location subscription ended");
                        break;
                    };
                    let mut state = self.state.lock().await;
                    if !state.engine.status().is_active() {
                        break;
                    }
                    state.engine.location_update(sample);
                    samples += 1;
                    if let Some(ref error) = state.engine.snapshot().last_error {
                        debug!(error = %error, "Sample rejected by meter");
                    }
                }

                _ = flush.tick() => {
                    let mut state = self.state.lock().await;
                    if let Err(e) = self.flush_locked(&mut state).await {
                        warn!(error = %e, "Snapshot flush failed");
                    }
                    if !state.engine.status().is_active() {
                        break;
                    }
                }
            }
        }

        subscription.cancel();

        let mut state = self.state.lock().await;
        if let Err(e) = self.flush_locked(&mut state).await {
            warn!(error = %e, "Final snapshot flush failed");
        }
        debug!(samples, "Location loop stopped");
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn fresh_fix(&self, timeout: std::time::Duration) -> Option<LocationSample> {
        match tokio::time::timeout(timeout, self.location.current_fix()).await {
            Ok(fix) => fix,
            Err(_) => {
                debug!(timeout_ms = timeout.as_millis() as u64, "Location fix timed out");
                None
            }
        }
    }

    /// Writes the snapshot if it changed since the last write.
    async fn flush_locked(&self, state: &mut ControllerState) -> SyncResult<bool> {
        let Some(ref trip) = state.trip else {
            return Ok(false);
        };
        let revision = state.engine.revision();
        if state.flushed_revision == Some(revision) {
            return Ok(false);
        }

        self.db
            .active_trip()
            .save(&ActiveTrip {
                trip_id: trip.trip_id.clone(),
                context: trip.context.clone(),
                snapshot: state.engine.snapshot().clone(),
            })
            .await?;
        state.flushed_revision = Some(revision);

        debug!(trip_id = %trip.trip_id, revision, "Snapshot flushed");
        Ok(true)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{offline, ScriptedApi};
    use crate::auth::StaticCredentials;
    use crate::config::OutboxSettings;
    use crate::location::ReplayLocationProvider;
    use hailmeter_core::{Coordinate, Money, OtherFee};
    use hailmeter_db::DbConfig;
    use std::time::Duration;

    /// `n` fixes 10 s apart heading north at about 11 m/s.
    fn trace(n: usize) -> Vec<LocationSample> {
        (0..n)
            .map(|i| {
                LocationSample::new(
                    Coordinate::new(40.0 + i as f64 * 0.001, -73.0).unwrap(),
                    1_700_000_000_000 + i as i64 * 10_000,
                )
            })
            .collect()
    }

    fn pricing() -> PricingConfig {
        PricingConfig {
            base_fare: Money::from_cents(300),
            ..PricingConfig::new(Money::from_cents(250), Money::from_cents(50))
        }
    }

    fn settings() -> MeterSettings {
        MeterSettings {
            snapshot_flush_ms: 50,
            start_fix_timeout_ms: 200,
            end_fix_timeout_ms: 200,
        }
    }

    struct Fixture {
        db: Database,
        api: Arc<ScriptedApi>,
        controller: Arc<TripController>,
    }

    fn controller_on(
        db: &Database,
        api: Arc<ScriptedApi>,
        provider: ReplayLocationProvider,
        settings: MeterSettings,
    ) -> Arc<TripController> {
        let pipeline = Arc::new(SubmissionPipeline::new(
            db.clone(),
            api,
            OutboxSettings::default(),
        ));
        Arc::new(
            TripController::new(
                db.clone(),
                pipeline,
                Arc::new(provider),
                Arc::new(StaticCredentials::new("tok")),
                settings,
            )
            .with_driver_id(Some("drv-1".into())),
        )
    }

    async fn fixture_with(api: ScriptedApi, provider: ReplayLocationProvider) -> Fixture {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let api = Arc::new(api);
        let controller = controller_on(&db, api.clone(), provider, settings());
        Fixture { db, api, controller }
    }

    async fn fixture(samples: Vec<LocationSample>) -> Fixture {
        fixture_with(ScriptedApi::new(), ReplayLocationProvider::new(samples)).await
    }

    async fn drive(f: &Fixture, provider: &ReplayLocationProvider) {
        f.controller.run(provider.subscribe()).await.unwrap();
    }

    #[tokio::test]
    async fn test_booking_trip_end_to_end() {
        let samples = trace(10);
        let provider = ReplayLocationProvider::new(samples.clone());
        let f = fixture_with(ScriptedApi::new(), provider.clone()).await;

        let trip_id = f
            .controller
            .start_trip(pricing(), TripContext::for_booking("bk-1"))
            .await
            .unwrap();
        assert_eq!(f.controller.status().await, MeterStatus::Running);
        assert!(f.db.active_trip().load().await.unwrap().is_some());

        drive(&f, &provider).await;
        let live = f.controller.live_fare().await.unwrap();

        let outcome = f.controller.end_trip().await.unwrap();
        assert_eq!(
            outcome.delivery,
            Delivery::Submitted {
                booking_id: "bk-1".into()
            }
        );
        assert_eq!(outcome.summary.trip_id, trip_id);
        assert_eq!(outcome.summary.snapshot.status, MeterStatus::Completed);
        assert_eq!(outcome.summary.fare, live);

        // 9 legs of ~111 m
        let distance = outcome.summary.snapshot.distance_meters;
        assert!((distance - 1_000.7).abs() < 5.0, "distance {distance}");
        assert_eq!(outcome.summary.snapshot.elapsed_seconds, 90.0);

        let sent = f.api.completed.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].booking_id, "bk-1");
        assert_eq!(sent[0].trip.driver_id.as_deref(), Some("drv-1"));
        assert_eq!(sent[0].trip.fare.total, outcome.summary.fare.total);
        drop(sent);

        assert!(f.db.active_trip().load().await.unwrap().is_none());
        assert_eq!(f.controller.trip_id().await, None);
    }

    #[tokio::test]
    async fn test_offline_end_saves_locally() {
        let api = ScriptedApi::new();
        api.push_create(Err(offline()));
        let provider = ReplayLocationProvider::new(trace(3));
        let f = fixture_with(api, provider.clone()).await;

        let context = TripContext {
            passenger_count: 2,
            other_fees: vec![OtherFee::new("toll", Money::from_cents(650))],
            ..TripContext::flagdown()
        };
        f.controller.start_trip(pricing(), context).await.unwrap();
        drive(&f, &provider).await;

        let outcome = f.controller.end_trip().await.unwrap();
        assert!(matches!(outcome.delivery, Delivery::SavedLocally { .. }));
        assert_eq!(outcome.summary.fare.other_fees_total, Money::from_cents(650));

        let pending = f.db.outbox().pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, hailmeter_core::OutboxKind::FlagdownThenComplete);
        assert!(f.db.active_trip().load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_flagdown_submitted() {
        let provider = ReplayLocationProvider::new(trace(3));
        let f = fixture_with(ScriptedApi::new(), provider.clone()).await;
        f.controller
            .start_trip(pricing(), TripContext::flagdown())
            .await
            .unwrap();
        drive(&f, &provider).await;

        let outcome = f.controller.end_trip().await.unwrap();
        assert_eq!(
            outcome.delivery,
            Delivery::Submitted {
                booking_id: "fd-1".into()
            }
        );
        assert_eq!(f.api.created_count(), 1);
    }

    #[tokio::test]
    async fn test_end_without_trip() {
        let f = fixture(trace(1)).await;
        assert!(matches!(f.controller.end_trip().await, Err(SyncError::NoActiveTrip)));
        assert!(matches!(f.controller.pause().await, Err(SyncError::NoActiveTrip)));
    }

    #[tokio::test]
    async fn test_racing_end_trip_settles_once() {
        let provider = ReplayLocationProvider::new(trace(3));
        let f = fixture_with(
            ScriptedApi::with_delay(Duration::from_millis(100)),
            provider.clone(),
        )
        .await;
        f.controller
            .start_trip(pricing(), TripContext::for_booking("bk-1"))
            .await
            .unwrap();

        let (a, b) = tokio::join!(f.controller.end_trip(), f.controller.end_trip());
        let ok = [a.is_ok(), b.is_ok()];
        assert_eq!(ok.iter().filter(|x| **x).count(), 1);
        assert!(matches!(a.err().or(b.err()), Some(SyncError::NoActiveTrip)));
        assert_eq!(f.api.completed_count(), 1);
    }

    #[tokio::test]
    async fn test_summary_taken_once() {
        let f = fixture(trace(2)).await;
        let trip_id = f
            .controller
            .start_trip(pricing(), TripContext::for_booking("bk-1"))
            .await
            .unwrap();
        f.controller.end_trip().await.unwrap();

        assert_eq!(f.controller.take_summary("other").await, None);
        let summary = f.controller.take_summary(&trip_id).await.unwrap();
        assert_eq!(summary.trip_id, trip_id);
        assert_eq!(f.controller.take_summary(&trip_id).await, None);
    }

    #[tokio::test]
    async fn test_start_twice_is_refused() {
        let f = fixture(trace(1)).await;
        f.controller
            .start_trip(pricing(), TripContext::flagdown())
            .await
            .unwrap();

        let err = f
            .controller
            .start_trip(pricing(), TripContext::flagdown())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Meter(CoreError::InvalidTransition {
                from: MeterStatus::Running,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_next_trip_after_settlement() {
        let f = fixture(trace(2)).await;
        let first = f
            .controller
            .start_trip(pricing(), TripContext::for_booking("bk-1"))
            .await
            .unwrap();
        f.controller.end_trip().await.unwrap();
        assert_eq!(f.controller.status().await, MeterStatus::Completed);

        let second = f
            .controller
            .start_trip(pricing(), TripContext::for_booking("bk-2"))
            .await
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(f.controller.snapshot().await.distance_meters, 0.0);
    }

    #[tokio::test]
    async fn test_start_does_not_wait_forever_for_gps() {
        let provider = ReplayLocationProvider::new(trace(1)).with_fix_delay(Duration::from_secs(30));
        let f = fixture_with(ScriptedApi::new(), provider).await;

        let started = tokio::time::timeout(
            Duration::from_secs(5),
            f.controller.start_trip(pricing(), TripContext::flagdown()),
        )
        .await
        .expect("start must not block on GPS");
        assert!(started.is_ok());

        let snapshot = f.controller.snapshot().await;
        assert_eq!(snapshot.status, MeterStatus::Running);
        assert_eq!(snapshot.last_sample, None);
    }

    #[tokio::test]
    async fn test_pause_is_persisted() {
        let f = fixture(trace(1)).await;
        f.controller
            .start_trip(pricing(), TripContext::flagdown())
            .await
            .unwrap();

        assert!(f.controller.pause().await.unwrap());
        let stored = f.db.active_trip().load().await.unwrap().unwrap();
        assert_eq!(stored.snapshot.status, MeterStatus::Paused);

        assert!(!f.controller.pause().await.unwrap());
        assert!(f.controller.resume().await.unwrap());
        let stored = f.db.active_trip().load().await.unwrap().unwrap();
        assert_eq!(stored.snapshot.status, MeterStatus::Running);
    }

    #[tokio::test]
    async fn test_restart_restores_running_trip() {
        let samples = trace(12);
        let first_half = ReplayLocationProvider::new(samples[..6].to_vec());
        let f = fixture_with(ScriptedApi::new(), first_half.clone()).await;
        let trip_id = f
            .controller
            .start_trip(pricing(), TripContext::for_booking("bk-1"))
            .await
            .unwrap();
        drive(&f, &first_half).await;
        let before = f.controller.snapshot().await;
        assert!(before.distance_meters > 0.0);

        // Same database, new process
        let second_half = ReplayLocationProvider::new(samples[6..].to_vec());
        let restarted = controller_on(&f.db, f.api.clone(), second_half.clone(), settings());
        assert_eq!(restarted.hydrate().await.unwrap(), MeterStatus::Running);
        assert_eq!(restarted.trip_id().await.as_deref(), Some(trip_id.as_str()));

        let restored = restarted.snapshot().await;
        assert_eq!(restored.distance_meters, before.distance_meters);
        assert_eq!(restored.wait_seconds, before.wait_seconds);

        restarted.run(second_half.subscribe()).await.unwrap();
        let outcome = restarted.end_trip().await.unwrap();
        assert!(outcome.summary.snapshot.distance_meters > before.distance_meters);
        assert_eq!(outcome.summary.snapshot.elapsed_seconds, 110.0);
    }

    #[tokio::test]
    async fn test_restart_while_settling_finishes_submission() {
        let f = fixture(trace(2)).await;
        let mut engine = MeterEngine::new();
        let samples = trace(2);
        engine.start(pricing(), Some(samples[0]), 0).unwrap();
        engine.location_update(samples[1]);
        engine.stop(samples[1].timestamp_ms).unwrap();
        f.db.active_trip()
            .save(&ActiveTrip {
                trip_id: "trip-crashed".into(),
                context: TripContext::for_booking("bk-7"),
                snapshot: engine.snapshot().clone(),
            })
            .await
            .unwrap();

        assert_eq!(f.controller.hydrate().await.unwrap(), MeterStatus::Completed);
        let outcome = f.controller.end_trip().await.unwrap();
        assert_eq!(outcome.summary.trip_id, "trip-crashed");
        assert_eq!(outcome.summary.snapshot, *engine.snapshot());
        assert_eq!(f.api.completed_count(), 1);
        assert!(f.db.active_trip().load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hydrate_discards_unreadable_trip() {
        let f = fixture(trace(1)).await;
        f.controller
            .start_trip(pricing(), TripContext::flagdown())
            .await
            .unwrap();
        sqlx::query("UPDATE active_trip SET snapshot = '{not json' WHERE slot = 1")
            .execute(f.db.pool())
            .await
            .unwrap();

        let restarted = controller_on(&f.db, f.api.clone(), ReplayLocationProvider::new(trace(1)), settings());
        assert_eq!(restarted.hydrate().await.unwrap(), MeterStatus::Idle);
        assert!(f.db.active_trip().load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let f = fixture(trace(2)).await;
        let trip_id = f
            .controller
            .start_trip(pricing(), TripContext::flagdown())
            .await
            .unwrap();
        f.controller.reset().await.unwrap();

        assert_eq!(f.controller.status().await, MeterStatus::Idle);
        assert_eq!(f.controller.trip_id().await, None);
        assert_eq!(f.controller.take_summary(&trip_id).await, None);
        assert!(f.db.active_trip().load().await.unwrap().is_none());
        assert!(!f.controller.background().await.unwrap());
    }

    #[tokio::test]
    async fn test_run_flushes_periodically_and_stops_on_cancel() {
        let provider = ReplayLocationProvider::new(trace(1_000)).with_pacing(Duration::from_millis(10));
        let f = fixture_with(ScriptedApi::new(), provider.clone()).await;
        f.controller
            .start_trip(pricing(), TripContext::flagdown())
            .await
            .unwrap();

        let subscription = provider.subscribe();
        let cancel = subscription.cancel_handle();
        let runner = {
            let controller = f.controller.clone();
            tokio::spawn(async move { controller.run(subscription).await })
        };

        tokio::time::sleep(Duration::from_millis(300)).await;
        let mid = f.db.active_trip().load().await.unwrap().unwrap();
        assert!(mid.snapshot.distance_meters > 0.0);

        cancel.cancel();
        runner.await.unwrap().unwrap();

        // Nothing reaches the meter after cancellation
        let after_cancel = f.controller.snapshot().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.controller.snapshot().await, after_cancel);

        let stored = f.db.active_trip().load().await.unwrap().unwrap();
        assert_eq!(stored.snapshot, after_cancel);
    }
}
