//! # Submission Pipeline
//!
//! Delivers finished trips to the backend, holding them in the durable
//! outbox for as long as the backend is out of reach.
//!
//! ## Drain Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Outbox Drain                                     │
//! │                                                                         │
//! │  for entry in pending() (insertion order):                             │
//! │                                                                         │
//! │    attempts > 0 and now − last_attempt < min(max_backoff, 2^attempts s)│
//! │        → skip (still backing off), continue with the next entry        │
//! │                                                                         │
//! │    deliver(entry)                                                      │
//! │      ├── Delivered                → DELETE, continue                   │
//! │      ├── Rejected (400/401/…/422) → DELETE, report once, continue      │
//! │      └── Transport failure        → attempts += 1, last_attempt = now, │
//! │                                     STOP (later entries stay queued)   │
//! │                                                                         │
//! │  One drain at a time: a concurrent request gets DrainInProgress.       │
//! │  Never called without a token.                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Triggers
//! - `submit_now` on trip end, enqueueing on transport failure
//! - the background runner, on a timer and on every transition to
//!   [`ConnectionState::Connected`]
//! - the CLI `drain` command

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use hailmeter_db::{Database, OutboxEntry};

use crate::api::{ApiError, CompletionApi};
use crate::auth::CredentialSource;
use crate::config::OutboxSettings;
use crate::error::{SyncError, SyncResult};
use crate::submission::{deliver, DeliveryResult, Submission};

// =============================================================================
// Event Emitter
// =============================================================================

/// Trait for surfacing delivery outcomes to the UI layer.
pub trait PipelineEventEmitter: Send + Sync {
    /// A trip could not be delivered now and is waiting in the outbox.
    fn saved_locally(&self, trip_id: &str, entry_id: &str);

    /// The backend confirmed a trip.
    fn delivered(&self, trip_id: &str, booking_id: &str);

    /// The backend refused a trip; it will not be retried.
    fn rejected(&self, trip_id: &str, status: u16, message: &str);
}

/// No-op event emitter for testing and headless use.
pub struct NoOpEmitter;

impl PipelineEventEmitter for NoOpEmitter {
    fn saved_locally(&self, _trip_id: &str, _entry_id: &str) {}
    fn delivered(&self, _trip_id: &str, _booking_id: &str) {}
    fn rejected(&self, _trip_id: &str, _status: u16, _message: &str) {}
}

// =============================================================================
// Connection State
// =============================================================================

/// Network reachability as reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

// =============================================================================
// Backoff
// =============================================================================

/// Backoff window after `attempts` failures: `min(max_backoff, 2^attempts)`
/// seconds, in milliseconds.
pub fn backoff_window_ms(attempts: i64, max_backoff_secs: u64) -> i64 {
    if attempts <= 0 {
        return 0;
    }
    let secs = 1u64
        .checked_shl(attempts.min(63) as u32)
        .unwrap_or(u64::MAX)
        .min(max_backoff_secs);
    i64::try_from(secs.saturating_mul(1_000)).unwrap_or(i64::MAX)
}

/// True when `entry` may be attempted at `now_ms`.
pub fn is_due(entry: &OutboxEntry, now_ms: i64, max_backoff_secs: u64) -> bool {
    match entry.last_attempt_at_ms {
        Some(last) if entry.attempts > 0 => {
            now_ms.saturating_sub(last) >= backoff_window_ms(entry.attempts, max_backoff_secs)
        }
        _ => true,
    }
}

// =============================================================================
// Results
// =============================================================================

/// Counters for one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub attempted: usize,
    pub delivered: usize,
    /// Removed without delivery: rejected or unreadable.
    pub dropped: usize,
    /// Left queued behind a transport failure, the failed entry included.
    pub deferred: usize,
    pub skipped_backoff: usize,
}

/// How a trip submission ended, from the driver's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Delivery {
    /// The backend confirmed the trip.
    #[serde(rename_all = "camelCase")]
    Submitted { booking_id: String },

    /// The trip is in the outbox and will be retried.
    #[serde(rename_all = "camelCase")]
    SavedLocally { entry_id: String },

    /// The backend refused the trip. Not retried.
    Rejected { status: u16, message: String },
}

// =============================================================================
// Submission Pipeline
// =============================================================================

pub struct SubmissionPipeline {
    db: Database,
    api: Arc<dyn CompletionApi>,
    emitter: Arc<dyn PipelineEventEmitter>,
    settings: OutboxSettings,
    drain_lock: Mutex<()>,
}

impl SubmissionPipeline {
    pub fn new(db: Database, api: Arc<dyn CompletionApi>, settings: OutboxSettings) -> Self {
        Self::with_emitter(db, api, settings, Arc::new(NoOpEmitter))
    }

    pub fn with_emitter(
        db: Database,
        api: Arc<dyn CompletionApi>,
        settings: OutboxSettings,
        emitter: Arc<dyn PipelineEventEmitter>,
    ) -> Self {
        SubmissionPipeline {
            db,
            api,
            emitter,
            settings,
            drain_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &OutboxSettings {
        &self.settings
    }

    /// Number of trips waiting in the outbox.
    pub async fn pending_count(&self) -> SyncResult<i64> {
        Ok(self.db.outbox().count_pending().await?)
    }

    /// Stores a submission for a later drain.
    pub async fn enqueue(&self, submission: &Submission) -> SyncResult<OutboxEntry> {
        let payload = submission.to_payload()?;
        let entry = self.db.outbox().enqueue(submission.kind(), &payload).await?;

        info!(
            trip_id = %submission.trip_id(),
            entry_id = %entry.id,
            kind = %entry.kind,
            "Trip saved locally"
        );
        self.emitter.saved_locally(submission.trip_id(), &entry.id);
        Ok(entry)
    }

    /// Attempts a submission immediately, falling back to the outbox.
    ///
    /// Without a token the submission goes straight to the outbox. A
    /// transport failure is not an error here: the driver is told the trip
    /// was saved locally.
    pub async fn submit_now(&self, token: Option<&str>, submission: Submission) -> SyncResult<Delivery> {
        let trip_id = submission.trip_id().to_string();

        let Some(token) = token else {
            debug!(trip_id = %trip_id, "No credential, deferring submission");
            let entry = self.enqueue(&submission).await?;
            return Ok(Delivery::SavedLocally { entry_id: entry.id });
        };

        match deliver(self.api.as_ref(), token, submission).await {
            DeliveryResult::Delivered { booking_id } => {
                info!(trip_id = %trip_id, booking_id = %booking_id, "Trip submitted");
                self.emitter.delivered(&trip_id, &booking_id);
                Ok(Delivery::Submitted { booking_id })
            }
            DeliveryResult::Failed {
                error: ApiError::Rejected { status, message },
                ..
            } => {
                warn!(trip_id = %trip_id, status, message = %message, "Trip rejected by backend");
                self.emitter.rejected(&trip_id, status, &message);
                Ok(Delivery::Rejected { status, message })
            }
            DeliveryResult::Failed { error, remaining } => {
                debug!(trip_id = %trip_id, error = %error, "Submission failed, using outbox");
                let entry = self.enqueue(&remaining).await?;
                Ok(Delivery::SavedLocally { entry_id: entry.id })
            }
        }
    }

    /// Drains the outbox using the wall clock, bounded by the drain timeout.
    pub async fn drain(&self, token: &str) -> SyncResult<DrainReport> {
        let _guard = self
            .drain_lock
            .try_lock()
            .map_err(|_| SyncError::DrainInProgress)?;

        let timeout = self.settings.drain_timeout();
        let now_ms = Utc::now().timestamp_millis();
        match tokio::time::timeout(timeout, self.drain_locked(token, now_ms)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout {
                operation: "outbox drain".into(),
                after_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Drains the outbox as if the current time were `now_ms`.
    pub async fn drain_at(&self, token: &str, now_ms: i64) -> SyncResult<DrainReport> {
        let _guard = self
            .drain_lock
            .try_lock()
            .map_err(|_| SyncError::DrainInProgress)?;
        self.drain_locked(token, now_ms).await
    }

    /// Drains with the current credential. `None` when signed out.
    pub async fn drain_with(&self, credentials: &dyn CredentialSource) -> SyncResult<Option<DrainReport>> {
        match credentials.current_token() {
            Some(token) => self.drain(&token).await.map(Some),
            None => Ok(None),
        }
    }

    async fn drain_locked(&self, token: &str, now_ms: i64) -> SyncResult<DrainReport> {
        let outbox = self.db.outbox();
        let entries = outbox.pending().await?;
        let mut report = DrainReport::default();

        if entries.is_empty() {
            debug!("Outbox empty");
            return Ok(report);
        }

        let total = entries.len();
        debug!(count = total, "Draining outbox");

        for (index, entry) in entries.into_iter().enumerate() {
            if !is_due(&entry, now_ms, self.settings.max_backoff_secs) {
                debug!(entry_id = %entry.id, attempts = entry.attempts, "Entry backing off");
                report.skipped_backoff += 1;
                continue;
            }

            let submission = match Submission::from_entry(&entry) {
                Ok(submission) => submission,
                Err(e) => {
                    error!(entry_id = %entry.id, error = %e, "Dropping unreadable outbox entry");
                    outbox.remove(&entry.id).await?;
                    report.dropped += 1;
                    continue;
                }
            };

            report.attempted += 1;
            let trip_id = submission.trip_id().to_string();

            match deliver(self.api.as_ref(), token, submission).await {
                DeliveryResult::Delivered { booking_id } => {
                    outbox.remove(&entry.id).await?;
                    report.delivered += 1;
                    info!(trip_id = %trip_id, entry_id = %entry.id, "Queued trip delivered");
                    self.emitter.delivered(&trip_id, &booking_id);
                }
                DeliveryResult::Failed {
                    error: ApiError::Rejected { status, message },
                    ..
                } => {
                    outbox.remove(&entry.id).await?;
                    report.dropped += 1;
                    warn!(
                        trip_id = %trip_id,
                        entry_id = %entry.id,
                        status,
                        message = %message,
                        "Queued trip rejected, dropping"
                    );
                    self.emitter.rejected(&trip_id, status, &message);
                }
                DeliveryResult::Failed { error, remaining } => {
                    if remaining.kind() != entry.kind {
                        outbox
                            .replace_payload(&entry.id, remaining.kind(), &remaining.to_payload()?)
                            .await?;
                    }
                    outbox
                        .record_attempt(&entry.id, now_ms, &error.to_string())
                        .await?;
                    report.deferred = total - index;
                    info!(
                        entry_id = %entry.id,
                        attempts = entry.attempts + 1,
                        error = %error,
                        "Backend unreachable, stopping drain"
                    );
                    break;
                }
            }
        }

        debug!(?report, "Drain finished");
        Ok(report)
    }

    // =========================================================================
    // Background Runner
    // =========================================================================

    /// Starts the background drain task.
    ///
    /// Drains every `drain_interval_secs` while connected, right away on
    /// each transition to `Connected`, and on [`PipelineHandle::trigger`].
    /// Stops on [`PipelineHandle::shutdown`] or when every handle is dropped.
    pub fn spawn(
        self: Arc<Self>,
        credentials: Arc<dyn CredentialSource>,
        mut connectivity: watch::Receiver<ConnectionState>,
    ) -> PipelineHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(8);

        tokio::spawn(async move {
            info!("Submission pipeline starting");

            let mut interval = tokio::time::interval(self.settings.drain_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            let mut connected = *connectivity.borrow_and_update() == ConnectionState::Connected;
            let mut watching = true;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if connected {
                            self.background_drain(credentials.as_ref(), "interval").await;
                        }
                    }

                    changed = connectivity.changed(), if watching => {
                        if changed.is_err() {
                            debug!("Connectivity source closed");
                            watching = false;
                            continue;
                        }
                        let now_connected =
                            *connectivity.borrow_and_update() == ConnectionState::Connected;
                        if now_connected && !connected {
                            self.background_drain(credentials.as_ref(), "reconnected").await;
                        }
                        connected = now_connected;
                    }

                    Some(()) = trigger_rx.recv() => {
                        self.background_drain(credentials.as_ref(), "triggered").await;
                    }

                    _ = shutdown_rx.recv() => {
                        info!("Submission pipeline shutting down");
                        break;
                    }
                }
            }

            info!("Submission pipeline stopped");
        });

        PipelineHandle {
            shutdown_tx,
            trigger_tx,
        }
    }

    async fn background_drain(&self, credentials: &dyn CredentialSource, reason: &str) {
        match self.drain_with(credentials).await {
            Ok(Some(report)) if report.attempted > 0 => {
                info!(reason, ?report, "Background drain finished");
            }
            Ok(Some(_)) => {}
            Ok(None) => debug!(reason, "No credential, skipping drain"),
            Err(SyncError::DrainInProgress) => debug!(reason, "Drain already running"),
            Err(e) => warn!(reason, error = %e, "Background drain failed"),
        }
    }
}

/// Handle for controlling the background runner.
#[derive(Clone)]
pub struct PipelineHandle {
    shutdown_tx: mpsc::Sender<()>,
    trigger_tx: mpsc::Sender<()>,
}

impl PipelineHandle {
    /// Requests a drain as soon as the runner is free.
    pub fn trigger(&self) -> SyncResult<()> {
        match self.trigger_tx.try_send(()) {
            // A queued trigger already covers this one
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(())) => Err(SyncError::ShuttingDown),
        }
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Shutdown channel closed".into()))
    }

    /// True until the runner task has exited.
    pub fn is_running(&self) -> bool {
        !self.shutdown_tx.is_closed()
    }
}

// =============================================================================
// Tests
// =============================================================================
