//! # Trip Submissions
//!
//! The logical operation that settles one finished trip, in a form that can
//! be attempted now or stored in the outbox and attempted later.
//!
//! ## Delivery
//! ```text
//! StatusUpdate(req) ──► complete_booking(req) ──► Delivered
//!                                │
//!                                └── error ──► Failed{remaining: StatusUpdate(req)}
//!
//! FlagdownThenComplete ──► create_flagdown ──► complete_booking(new id) ──► Delivered
//!                               │                        │
//!                               │                        └── error ──► Failed{remaining:
//!                               │                                   StatusUpdate(new id)}
//!                               └── error ──► Failed{remaining: FlagdownThenComplete}
//! ```
//!
//! Once the flagdown booking exists, the remaining work is a plain status
//! update. Retrying never creates a second booking.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use hailmeter_core::{FareBreakdown, MeterSnapshot, OutboxKind, TripContext};
use hailmeter_db::OutboxEntry;

use crate::api::{ApiError, CompleteTripRequest, CompletionApi, FlagdownRequest, TripCompletion};
use crate::error::SyncResult;

/// Namespace for idempotency keys derived from trip ids.
const IDEMPOTENCY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b7e_94d3_4a58_b0e1_3c5d_7a92_e4f6);

/// Stable key for one backend step of one trip.
///
/// Settling the same trip twice (a crash between enqueue and clearing the
/// active slot) yields the same keys, so the backend drops the repeat.
pub fn idempotency_key(trip_id: &str, step: &str) -> String {
    Uuid::new_v5(&IDEMPOTENCY_NAMESPACE, format!("{trip_id}/{step}").as_bytes()).to_string()
}

/// A street hail waiting to be created and completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagdownSubmission {
    pub create: FlagdownRequest,
    /// Idempotency key for the completion step, fixed up front.
    pub completion_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    StatusUpdate(CompleteTripRequest),
    FlagdownThenComplete(FlagdownSubmission),
}

/// What happened when a submission was attempted.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryResult {
    Delivered { booking_id: String },
    Failed { error: ApiError, remaining: Submission },
}

impl Submission {
    /// Builds the submission for a completed trip.
    ///
    /// Dispatched bookings become a status update; street hails become a
    /// create-then-complete pair.
    pub fn for_trip(
        trip_id: &str,
        context: &TripContext,
        snapshot: &MeterSnapshot,
        fare: &FareBreakdown,
        driver_id: Option<&str>,
    ) -> Self {
        let trip = TripCompletion {
            trip_id: trip_id.to_string(),
            driver_id: driver_id.map(str::to_string),
            started_at_ms: snapshot.started_at_ms,
            ended_at_ms: snapshot.ended_at_ms.unwrap_or(snapshot.last_timestamp_ms),
            distance_meters: snapshot.distance_meters,
            distance_miles: snapshot.distance_miles(),
            wait_seconds: snapshot.wait_seconds,
            elapsed_seconds: snapshot.elapsed_seconds,
            passenger_count: context.passenger_count.max(1),
            pickup: snapshot.recent_points.first().copied(),
            dropoff: snapshot
                .last_sample
                .map(|s| s.coordinate)
                .or_else(|| snapshot.recent_points.last().copied()),
            flat_rate_id: context.flat_rate.as_ref().map(|f| f.id.clone()),
            fare: fare.clone(),
        };

        match context.booking_id {
            Some(ref booking_id) => Submission::StatusUpdate(CompleteTripRequest {
                idempotency_key: idempotency_key(trip_id, "complete"),
                booking_id: booking_id.clone(),
                trip,
            }),
            None => Submission::FlagdownThenComplete(FlagdownSubmission {
                create: FlagdownRequest {
                    idempotency_key: idempotency_key(trip_id, "flagdown"),
                    trip,
                },
                completion_key: idempotency_key(trip_id, "complete"),
            }),
        }
    }

    pub fn kind(&self) -> OutboxKind {
        match self {
            Submission::StatusUpdate(_) => OutboxKind::StatusUpdate,
            Submission::FlagdownThenComplete(_) => OutboxKind::FlagdownThenComplete,
        }
    }

    pub fn trip_id(&self) -> &str {
        match self {
            Submission::StatusUpdate(req) => &req.trip.trip_id,
            Submission::FlagdownThenComplete(fd) => &fd.create.trip.trip_id,
        }
    }

    /// Outbox payload JSON.
    pub fn to_payload(&self) -> SyncResult<String> {
        let payload = match self {
            Submission::StatusUpdate(req) => serde_json::to_string(req)?,
            Submission::FlagdownThenComplete(fd) => serde_json::to_string(fd)?,
        };
        Ok(payload)
    }

    /// Decodes a stored outbox entry.
    pub fn from_entry(entry: &OutboxEntry) -> SyncResult<Self> {
        let submission = match entry.kind {
            OutboxKind::StatusUpdate => Submission::StatusUpdate(serde_json::from_str(&entry.payload)?),
            OutboxKind::FlagdownThenComplete => {
                Submission::FlagdownThenComplete(serde_json::from_str(&entry.payload)?)
            }
        };
        Ok(submission)
    }
}

/// Attempts a submission once.
pub async fn deliver(api: &dyn CompletionApi, token: &str, submission: Submission) -> DeliveryResult {
    match submission {
        Submission::StatusUpdate(request) => match api.complete_booking(token, &request).await {
            Ok(()) => DeliveryResult::Delivered {
                booking_id: request.booking_id,
            },
            Err(error) => DeliveryResult::Failed {
                error,
                remaining: Submission::StatusUpdate(request),
            },
        },
        Submission::FlagdownThenComplete(flagdown) => {
            let created = match api.create_flagdown(token, &flagdown.create).await {
                Ok(created) => created,
                Err(error) => {
                    return DeliveryResult::Failed {
                        error,
                        remaining: Submission::FlagdownThenComplete(flagdown),
                    }
                }
            };

            debug!(
                trip_id = %flagdown.create.trip.trip_id,
                booking_id = %created.booking_id,
                "Flagdown booking created"
            );

            let request = CompleteTripRequest {
                idempotency_key: flagdown.completion_key,
                booking_id: created.booking_id,
                trip: flagdown.create.trip,
            };
            match api.complete_booking(token, &request).await {
                Ok(()) => DeliveryResult::Delivered {
                    booking_id: request.booking_id,
                },
                Err(error) => DeliveryResult::Failed {
                    error,
                    remaining: Submission::StatusUpdate(request),
                },
            }
        }
    }
}
