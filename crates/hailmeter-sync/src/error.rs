//! # Sync Error Types
//!
//! Error types for trip orchestration and outbox delivery.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Backend     │  │       Pipeline          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Api(Rejected)  │  │  DrainInProgress        │ │
//! │  │  InvalidUrl     │  │  Api(Transport) │  │  MissingCredentials     │ │
//! │  │  ConfigLoad…    │  │  Timeout        │  │  ShuttingDown           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │     Meter       │  │    Database     │                              │
//! │  │                 │  │                 │                              │
//! │  │  Meter(Core…)   │  │  DatabaseError  │                              │
//! │  │  NoActiveTrip   │  │  Serialization  │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A network failure while ending a trip is not an error at this level: the
//! trip is enqueued and reported as saved locally.

use thiserror::Error;

use crate::api::ApiError;
use hailmeter_core::CoreError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Meter Errors
    // =========================================================================
    /// A driver action the meter refused (e.g. start while running).
    #[error(transparent)]
    Meter(#[from] CoreError),

    /// `end_trip` or `pause` with nothing on the meter.
    #[error("No trip in progress")]
    NoActiveTrip,

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A bounded operation did not finish in time.
    #[error("{operation} timed out after {after_ms} ms")]
    Timeout { operation: String, after_ms: u64 },

    /// Drain requested without an authorization token.
    #[error("No authorization credential available")]
    MissingCredentials,

    // =========================================================================
    // Pipeline Errors
    // =========================================================================
    /// Another drain of the same outbox is running.
    ///
    /// ## When This Occurs
    /// - Connectivity flips to connected while a timer-driven drain runs
    /// - The CLI `drain` command runs next to a background runner
    #[error("An outbox drain is already in progress")]
    DrainInProgress,

    #[error("Submission pipeline is shutting down")]
    ShuttingDown,

    #[error("Channel error: {0}")]
    ChannelError(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<hailmeter_db::DbError> for SyncError {
    fn from(err: hailmeter_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if trying the same operation later may succeed.
    ///
    /// ## Retryable Errors
    /// - Transport-level API failures
    /// - Timeouts
    /// - A drain already running
    ///
    /// ## Non-Retryable Errors
    /// - Authoritative backend rejections
    /// - Configuration errors
    /// - Refused meter transitions
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Api(api) => !api.is_rejection(),
            SyncError::Timeout { .. } | SyncError::DrainInProgress => true,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hailmeter_core::MeterStatus;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Api(ApiError::Transport("reset".into())).is_retryable());
        assert!(SyncError::DrainInProgress.is_retryable());
        assert!(SyncError::Timeout {
            operation: "drain".into(),
            after_ms: 60_000
        }
        .is_retryable());

        assert!(!SyncError::Api(ApiError::Rejected {
            status: 401,
            message: "expired".into()
        })
        .is_retryable());
        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
        assert!(!SyncError::NoActiveTrip.is_retryable());
    }

    #[test]
    fn test_meter_errors_pass_through() {
        let err: SyncError = CoreError::InvalidTransition {
            from: MeterStatus::Running,
            action: "start".into(),
        }
        .into();
        assert_eq!(err.to_string(), "Cannot start while meter is running");
        assert!(!err.is_config_error());
    }
}
