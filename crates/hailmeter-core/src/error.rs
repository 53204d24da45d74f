//! # Error Types
//!
//! Domain-specific error types for hailmeter-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  hailmeter-core errors (this file)                                     │
//! │  └── CoreError        - Invalid input or disallowed transition         │
//! │                                                                         │
//! │  hailmeter-db errors                                                   │
//! │  └── DbError          - Storage failures                               │
//! │                                                                         │
//! │  hailmeter-sync errors                                                 │
//! │  └── SyncError        - Config, network, drain failures                │
//! │                                                                         │
//! │  Flow: CoreError → SyncError → driver-facing message                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation Policy
//! Only driver-requested operations (`start`, `stop`) return a `CoreError`.
//! A bad location sample is recorded on the snapshot as `last_error` and the
//! trip keeps running.

use thiserror::Error;

use crate::meter::MeterStatus;

// =============================================================================
// Core Error
// =============================================================================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// Coordinate is non-finite or outside [-90, 90] × [-180, 180].
    #[error("Invalid coordinate ({latitude}, {longitude}): {reason}")]
    InvalidCoordinate {
        latitude: f64,
        longitude: f64,
        reason: String,
    },

    /// A location sample carries an unusable field.
    ///
    /// ## When This Occurs
    /// - Reported speed is NaN or infinite
    /// - Timestamp is negative
    #[error("Invalid location sample: {0}")]
    InvalidSample(String),

    /// The meter cannot move from its current status to the requested one.
    ///
    /// ## User Workflow
    /// ```text
    /// Driver taps "Start" while a trip is already running
    ///      │
    ///      ▼
    /// InvalidTransition { from: Running, action: "start" }
    ///      │
    ///      ▼
    /// UI shows: "A trip is already in progress"
    /// ```
    #[error("Cannot {action} while meter is {from}")]
    InvalidTransition { from: MeterStatus, action: String },

    /// A persisted snapshot could not be decoded.
    #[error("Snapshot could not be decoded: {0}")]
    SnapshotDecode(String),
}

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
