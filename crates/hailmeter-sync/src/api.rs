//! # Backend Completion API
//!
//! The network boundary a finished trip crosses, and its wire shapes.
//!
//! ## Operations
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Dispatched booking                  Street hail (flagdown)            │
//! │  ──────────────────                  ──────────────────────            │
//! │  complete_booking(token, req)        create_flagdown(token, req)       │
//! │       │                                   │ → FlagdownCreated{id}      │
//! │       ▼                                   ▼                             │
//! │     Ok(())                           complete_booking(token, req')     │
//! │                                                                         │
//! │  Every failure is classified:                                          │
//! │    Rejected{status}  400 401 403 404 409 422   never retried           │
//! │    Transport(msg)    no status, 5xx, 408, 429  retried with backoff    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Delivery is at-least-once. Each request carries a client-generated
//! `idempotencyKey` that stays the same across retries so the backend can
//! drop duplicates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hailmeter_core::{Coordinate, FareBreakdown};

// =============================================================================
// Failure Classification
// =============================================================================

/// Statuses that mean "this request will never succeed as sent".
pub const REJECTION_STATUSES: [u16; 6] = [400, 401, 403, 404, 409, 422];

/// True for HTTP statuses that are an authoritative rejection.
pub fn is_authoritative_rejection(status: u16) -> bool {
    REJECTION_STATUSES.contains(&status)
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// The backend understood the request and refused it.
    #[error("Rejected by backend ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The request may not have reached the backend, or the backend could
    /// not answer. Safe to retry.
    #[error("Transport failure: {0}")]
    Transport(String),
}

impl ApiError {
    /// Classifies a non-success HTTP response.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if is_authoritative_rejection(status) {
            ApiError::Rejected { status, message }
        } else {
            ApiError::Transport(format!("HTTP {status}: {message}"))
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, ApiError::Rejected { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Rejected { status, .. } => Some(*status),
            ApiError::Transport(_) => None,
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

/// Measured facts about a finished trip, shared by both operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripCompletion {
    pub trip_id: String,
    #[serde(default)]
    pub driver_id: Option<String>,
    pub started_at_ms: i64,
    pub ended_at_ms: i64,
    pub distance_meters: f64,
    pub distance_miles: f64,
    pub wait_seconds: f64,
    pub elapsed_seconds: f64,
    pub passenger_count: u32,
    #[serde(default)]
    pub pickup: Option<Coordinate>,
    #[serde(default)]
    pub dropoff: Option<Coordinate>,
    #[serde(default)]
    pub flat_rate_id: Option<String>,
    pub fare: FareBreakdown,
}

/// "Mark booking completed" request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTripRequest {
    pub idempotency_key: String,
    pub booking_id: String,
    #[serde(flatten)]
    pub trip: TripCompletion,
}

/// "Create driver-initiated booking" request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagdownRequest {
    pub idempotency_key: String,
    #[serde(flatten)]
    pub trip: TripCompletion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagdownCreated {
    pub booking_id: String,
}

// =============================================================================
// Completion API Trait
// =============================================================================

/// Backend operations needed to settle a trip.
#[async_trait]
pub trait CompletionApi: Send + Sync {
    /// Marks an existing booking as completed.
    async fn complete_booking(
        &self,
        token: &str,
        request: &CompleteTripRequest,
    ) -> Result<(), ApiError>;

    /// Creates a booking for a street hail.
    async fn create_flagdown(
        &self,
        token: &str,
        request: &FlagdownRequest,
    ) -> Result<FlagdownCreated, ApiError>;
}

/// Stand-in used when no backend URL is configured.
///
/// Every call fails at the transport level, so finished trips land in the
/// outbox and wait for a real backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineApi;

#[async_trait]
impl CompletionApi for OfflineApi {
    async fn complete_booking(&self, _token: &str, _request: &CompleteTripRequest) -> Result<(), ApiError> {
        Err(ApiError::Transport("no backend configured".into()))
    }

    async fn create_flagdown(
        &self,
        _token: &str,
        _request: &FlagdownRequest,
    ) -> Result<FlagdownCreated, ApiError> {
        Err(ApiError::Transport("no backend configured".into()))
    }
}

// =============================================================================
// Scripted API (tests)
// =============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays queued results; succeeds once its script runs out.
    #[derive(Default)]
    pub struct ScriptedApi {
        complete_script: Mutex<VecDeque<Result<(), ApiError>>>,
        create_script: Mutex<VecDeque<Result<FlagdownCreated, ApiError>>>,
        pub completed: Mutex<Vec<CompleteTripRequest>>,
        pub created: Mutex<Vec<FlagdownRequest>>,
        pub tokens: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl ScriptedApi {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_delay(delay: Duration) -> Self {
            ScriptedApi {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub fn push_complete(&self, result: Result<(), ApiError>) {
            self.complete_script.lock().unwrap().push_back(result);
        }

        pub fn push_create(&self, result: Result<FlagdownCreated, ApiError>) {
            self.create_script.lock().unwrap().push_back(result);
        }

        pub fn completed_count(&self) -> usize {
            self.completed.lock().unwrap().len()
        }

        pub fn created_count(&self) -> usize {
            self.created.lock().unwrap().len()
        }
    }

    pub fn offline() -> ApiError {
        ApiError::Transport("connection refused".into())
    }

    pub fn rejected(status: u16) -> ApiError {
        ApiError::from_status(status, "rejected")
    }

    #[async_trait]
    impl CompletionApi for ScriptedApi {
        async fn complete_booking(
            &self,
            token: &str,
            request: &CompleteTripRequest,
        ) -> Result<(), ApiError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.tokens.lock().unwrap().push(token.to_string());
            let result = self
                .complete_script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()));
            if result.is_ok() {
                self.completed.lock().unwrap().push(request.clone());
            }
            result
        }

        async fn create_flagdown(
            &self,
            token: &str,
            request: &FlagdownRequest,
        ) -> Result<FlagdownCreated, ApiError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.tokens.lock().unwrap().push(token.to_string());
            let default = FlagdownCreated {
                booking_id: format!("fd-{}", self.created_count() + 1),
            };
            let result = self
                .create_script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(default));
            if result.is_ok() {
                self.created.lock().unwrap().push(request.clone());
            }
            result
        }
    }
}
