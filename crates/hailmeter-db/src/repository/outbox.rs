//! # Trip Outbox Repository
//!
//! Durable FIFO of trip completions the backend has not confirmed yet.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  END TRIP (network failed or offline)                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  INSERT INTO trip_outbox (id, kind, payload, created_at_ms)            │
//! │       │               attempts = 0, last_attempt_at_ms = NULL          │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            SUBMISSION PIPELINE (hailmeter-sync)                 │   │
//! │  │                                                                 │   │
//! │  │  1. SELECT * FROM trip_outbox ORDER BY seq                     │   │
//! │  │  2. For each entry:                                            │   │
//! │  │     a. Delivered or rejected → DELETE                          │   │
//! │  │     b. Network failure       → attempts += 1,                  │   │
//! │  │                                last_attempt_at_ms = now        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Insertion order is the `seq` autoincrement column, never the clock,   │
//! │  so entries created within the same millisecond keep their order.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! This repository stores and orders entries. Deciding when an entry is due
//! or should be dropped belongs to the pipeline.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use hailmeter_core::OutboxKind;

/// One queued network operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub id: String,
    pub kind: OutboxKind,
    /// JSON request body, opaque to this crate.
    pub payload: String,
    pub created_at_ms: i64,
    pub attempts: i64,
    pub last_attempt_at_ms: Option<i64>,
    pub last_error: Option<String>,
}

const SELECT_COLUMNS: &str =
    "id, kind, payload, created_at_ms, attempts, last_attempt_at_ms, last_error";

/// Repository for the trip outbox.
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
}

impl OutboxRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OutboxRepository { pool }
    }

    /// Appends an entry stamped with the current wall-clock time.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let payload = serde_json::to_string(&request)?;
    /// db.outbox().enqueue(OutboxKind::StatusUpdate, &payload).await?;
    /// ```
    pub async fn enqueue(&self, kind: OutboxKind, payload: &str) -> DbResult<OutboxEntry> {
        self.enqueue_at(kind, payload, Utc::now().timestamp_millis())
            .await
    }

    /// Appends an entry with an explicit creation time.
    pub async fn enqueue_at(
        &self,
        kind: OutboxKind,
        payload: &str,
        created_at_ms: i64,
    ) -> DbResult<OutboxEntry> {
        let entry = OutboxEntry {
            id: Uuid::new_v4().to_string(),
            kind,
            payload: payload.to_string(),
            created_at_ms,
            attempts: 0,
            last_attempt_at_ms: None,
            last_error: None,
        };

        debug!(entry_id = %entry.id, kind = %kind, "Enqueuing outbox entry");

        sqlx::query(
            r#"
            INSERT INTO trip_outbox (id, kind, payload, created_at_ms, attempts)
            VALUES (?1, ?2, ?3, ?4, 0)
            "#,
        )
        .bind(&entry.id)
        .bind(entry.kind)
        .bind(&entry.payload)
        .bind(entry.created_at_ms)
        .execute(&self.pool)
        .await?;

        Ok(entry)
    }

    /// Every queued entry, oldest first.
    pub async fn pending(&self) -> DbResult<Vec<OutboxEntry>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM trip_outbox ORDER BY seq ASC");
        let entries = sqlx::query_as::<_, OutboxEntry>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(entries)
    }

    /// Looks up one entry by id.
    pub async fn get(&self, id: &str) -> DbResult<Option<OutboxEntry>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM trip_outbox WHERE id = ?1");
        let entry = sqlx::query_as::<_, OutboxEntry>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(entry)
    }

    /// Deletes an entry. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM trip_outbox WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        debug!(entry_id = %id, removed = result.rows_affected() > 0, "Removed outbox entry");
        Ok(result.rows_affected() > 0)
    }

    /// Records a failed delivery: bumps `attempts`, stamps the time.
    pub async fn record_attempt(&self, id: &str, at_ms: i64, error: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE trip_outbox SET
                attempts = attempts + 1,
                last_attempt_at_ms = ?2,
                last_error = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(at_ms)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("OutboxEntry", id));
        }
        Ok(())
    }

    /// Rewrites the operation an entry performs, keeping its queue position
    /// and retry history.
    pub async fn replace_payload(&self, id: &str, kind: OutboxKind, payload: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE trip_outbox SET kind = ?2, payload = ?3 WHERE id = ?1")
            .bind(id)
            .bind(kind)
            .bind(payload)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("OutboxEntry", id));
        }
        Ok(())
    }

    /// Number of queued entries.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trip_outbox")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn repo() -> OutboxRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().outbox()
    }

    #[tokio::test]
    async fn test_enqueue_and_pending_in_insertion_order() {
        let repo = repo().await;
        let first = repo
            .enqueue_at(OutboxKind::StatusUpdate, r#"{"n":1}"#, 5_000)
            .await
            .unwrap();
        let second = repo
            .enqueue_at(OutboxKind::FlagdownThenComplete, r#"{"n":2}"#, 5_000)
            .await
            .unwrap();
        // Older timestamp, still queued last
        let third = repo
            .enqueue_at(OutboxKind::StatusUpdate, r#"{"n":3}"#, 1_000)
            .await
            .unwrap();

        let pending = repo.pending().await.unwrap();
        let ids: Vec<_> = pending.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![first.id.as_str(), second.id.as_str(), third.id.as_str()]);
        assert_eq!(pending[1].kind, OutboxKind::FlagdownThenComplete);
        assert_eq!(pending[0].attempts, 0);
        assert_eq!(pending[0].last_attempt_at_ms, None);
        assert_eq!(repo.count_pending().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let repo = repo().await;
        let a = repo.enqueue(OutboxKind::StatusUpdate, "{}").await.unwrap();
        let b = repo.enqueue(OutboxKind::StatusUpdate, "{}").await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_record_attempt() {
        let repo = repo().await;
        let entry = repo.enqueue(OutboxKind::StatusUpdate, "{}").await.unwrap();

        repo.record_attempt(&entry.id, 10_000, "connection refused")
            .await
            .unwrap();
        repo.record_attempt(&entry.id, 12_000, "timed out").await.unwrap();

        let stored = repo.get(&entry.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.last_attempt_at_ms, Some(12_000));
        assert_eq!(stored.last_error.as_deref(), Some("timed out"));
    }

    #[tokio::test]
    async fn test_record_attempt_missing_entry() {
        let repo = repo().await;
        let err = repo.record_attempt("nope", 1, "x").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_replace_payload_keeps_position_and_attempts() {
        let repo = repo().await;
        let flagdown = repo
            .enqueue(OutboxKind::FlagdownThenComplete, r#"{"create":true}"#)
            .await
            .unwrap();
        let other = repo.enqueue(OutboxKind::StatusUpdate, "{}").await.unwrap();
        repo.record_attempt(&flagdown.id, 1_000, "offline").await.unwrap();

        repo.replace_payload(&flagdown.id, OutboxKind::StatusUpdate, r#"{"bookingId":"b-1"}"#)
            .await
            .unwrap();

        let pending = repo.pending().await.unwrap();
        assert_eq!(pending[0].id, flagdown.id);
        assert_eq!(pending[0].kind, OutboxKind::StatusUpdate);
        assert_eq!(pending[0].payload, r#"{"bookingId":"b-1"}"#);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[1].id, other.id);
    }

    #[tokio::test]
    async fn test_remove() {
        let repo = repo().await;
        let entry = repo.enqueue(OutboxKind::StatusUpdate, "{}").await.unwrap();

        assert!(repo.remove(&entry.id).await.unwrap());
        assert!(!repo.remove(&entry.id).await.unwrap());
        assert_eq!(repo.count_pending().await.unwrap(), 0);
    }
}
