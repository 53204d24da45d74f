//! # hailmeter-sync: Trip Orchestration and Offline Submission
//!
//! Everything in Hailmeter that waits: location fixes, snapshot flushes,
//! backend calls and outbox drains.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  LocationProvider ──samples──► TripController ──► MeterEngine (core)   │
//! │   (location.rs)                (controller.rs)        │                 │
//! │                                      │                ▼                 │
//! │                                      │         ActiveTripRepository     │
//! │                                      │            (snapshot flush)      │
//! │                                      ▼                                  │
//! │                              compute_fare (core)                        │
//! │                                      │                                  │
//! │                                      ▼                                  │
//! │                            SubmissionPipeline (outbox.rs)               │
//! │                              │                 │                        │
//! │                  submit now  │                 │  on transport failure  │
//! │                              ▼                 ▼                        │
//! │                     CompletionApi       OutboxRepository                │
//! │                 (api.rs / http.rs)      drained on timer + reconnect    │
//! │                                                                         │
//! │  CredentialSource (auth.rs) supplies the bearer token; no token,       │
//! │  no network call.                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`api`] - Backend boundary trait, wire types, failure classification
//! - [`auth`] - Read-only credential access
//! - [`config`] - TOML + environment configuration
//! - [`controller`] - `TripController`
//! - [`error`] - Sync error types
//! - [`http`] - reqwest implementation of the backend boundary
//! - [`location`] - Location provider capability and replay provider
//! - [`outbox`] - `SubmissionPipeline`, drain/backoff, background runner
//! - [`submission`] - The settle-a-trip operation and its delivery
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hailmeter_sync::{HailmeterConfig, HttpCompletionApi, SubmissionPipeline, TripController};
//!
//! let config = HailmeterConfig::load_or_default(None);
//! let api = Arc::new(HttpCompletionApi::from_settings(&config.backend)?);
//! let pipeline = Arc::new(SubmissionPipeline::new(db.clone(), api, config.outbox.clone()));
//! let controller = TripController::new(db, pipeline, location, credentials, config.meter.clone());
//!
//! if controller.hydrate().await? == MeterStatus::Running {
//!     controller.run(location.subscribe()).await?;
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod api;
pub mod auth;
pub mod config;
pub mod controller;
pub mod error;
pub mod http;
pub mod location;
pub mod outbox;
pub mod submission;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use api::{
    ApiError, CompleteTripRequest, CompletionApi, FlagdownCreated, FlagdownRequest, OfflineApi,
    TripCompletion,
};
pub use auth::{CredentialSource, SharedCredentials, StaticCredentials};
pub use config::HailmeterConfig;
pub use controller::{TripController, TripOutcome, TripSummary};
pub use error::{SyncError, SyncResult};
pub use http::HttpCompletionApi;
pub use location::{CancelHandle, LocationProvider, LocationSubscription, ReplayLocationProvider};
pub use outbox::{
    ConnectionState, Delivery, DrainReport, NoOpEmitter, PipelineEventEmitter, PipelineHandle,
    SubmissionPipeline,
};
pub use submission::{DeliveryResult, Submission};
