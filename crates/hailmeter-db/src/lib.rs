//! # hailmeter-db: Durable Store for Hailmeter
//!
//! SQLite storage (via sqlx) for the two things that must survive process
//! death: the snapshot of the trip on the meter, and the outbox of completed
//! trips that the backend has not confirmed.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Hailmeter Data Flow                              │
//! │                                                                         │
//! │  TripController (flush snapshot)    SubmissionPipeline (drain)         │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   hailmeter-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │◄───│ ActiveTripRepo │    │  (embedded)  │  │   │
//! │  │   │  SqlitePool   │    │ OutboxRepo     │    │ 001_init.sql │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file in the platform data dir (hailmeter.db)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hailmeter_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("hailmeter.db")).await?;
//! let queued = db.outbox().count_pending().await?;
//! let trip = db.active_trip().load().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::active_trip::{ActiveTrip, ActiveTripRepository};
pub use repository::outbox::{OutboxEntry, OutboxRepository};
