//! # Repository Module
//!
//! Database repository implementations for Hailmeter.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  TripController                  SubmissionPipeline                    │
//! │       │                                │                                │
//! │       │ db.active_trip().save(..)      │ db.outbox().pending()          │
//! │       ▼                                ▼                                │
//! │  ActiveTripRepository            OutboxRepository                      │
//! │  ├── save(&trip)                 ├── enqueue(kind, payload)            │
//! │  ├── load()                      ├── pending()                         │
//! │  └── clear()                     ├── record_attempt(id, at, error)     │
//! │                                  ├── replace_payload(id, kind, payload)│
//! │                                  └── remove(id)                        │
//! │       │                                │                                │
//! │       └────────────┬───────────────────┘                                │
//! │                    ▼                                                    │
//! │               SQLite Database                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod active_trip;
pub mod outbox;
