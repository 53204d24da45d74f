//! # Active Trip Repository
//!
//! Single-slot storage for the trip currently on the meter.
//!
//! The row is overwritten on every flush and deleted on reset. After a process
//! restart, `load` hands back everything needed to resume metering and to
//! price the trip: the meter snapshot plus the driver-entered context.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use hailmeter_core::{MeterSnapshot, TripContext};

/// The persisted form of the trip in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTrip {
    pub trip_id: String,
    pub context: TripContext,
    pub snapshot: MeterSnapshot,
}

/// Repository for the active trip slot.
#[derive(Debug, Clone)]
pub struct ActiveTripRepository {
    pool: SqlitePool,
}

impl ActiveTripRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ActiveTripRepository { pool }
    }

    /// Writes `trip` into the slot, replacing whatever was there.
    pub async fn save(&self, trip: &ActiveTrip) -> DbResult<()> {
        let context = serde_json::to_string(&trip.context)?;
        let snapshot = serde_json::to_string(&trip.snapshot)?;

        debug!(
            trip_id = %trip.trip_id,
            status = %trip.snapshot.status,
            distance_m = trip.snapshot.distance_meters,
            "Saving active trip"
        );

        sqlx::query(
            r#"
            INSERT INTO active_trip (slot, trip_id, context, snapshot, updated_at)
            VALUES (1, ?1, ?2, ?3, ?4)
            ON CONFLICT(slot) DO UPDATE SET
                trip_id = excluded.trip_id,
                context = excluded.context,
                snapshot = excluded.snapshot,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&trip.trip_id)
        .bind(context)
        .bind(snapshot)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Reads the slot. `None` when no trip is stored.
    pub async fn load(&self) -> DbResult<Option<ActiveTrip>> {
        let row: Option<(String, String, String)> =
            sqlx::query_as("SELECT trip_id, context, snapshot FROM active_trip WHERE slot = 1")
                .fetch_optional(&self.pool)
                .await?;

        let Some((trip_id, context, snapshot)) = row else {
            return Ok(None);
        };

        Ok(Some(ActiveTrip {
            trip_id,
            context: serde_json::from_str(&context)?,
            snapshot: serde_json::from_str(&snapshot)?,
        }))
    }

    /// Empties the slot. Returns whether a trip was stored.
    pub async fn clear(&self) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM active_trip WHERE slot = 1")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::pool::{Database, DbConfig};
    use hailmeter_core::{Coordinate, LocationSample, MeterEngine, Money, PricingConfig};

    fn running_trip(trip_id: &str) -> ActiveTrip {
        let pricing = PricingConfig::new(Money::from_cents(250), Money::from_cents(50));
        let a = Coordinate::new(40.7580, -73.9855).unwrap();
        let b = Coordinate::new(40.7590, -73.9855).unwrap();

        let mut engine = MeterEngine::new();
        engine
            .start(pricing, Some(LocationSample::new(a, 1_000)), 1_000)
            .unwrap();
        engine.location_update(LocationSample::new(b, 21_000));

        let mut context = TripContext::for_booking("bk-42");
        context.passenger_count = 3;

        ActiveTrip {
            trip_id: trip_id.to_string(),
            context,
            snapshot: engine.snapshot().clone(),
        }
    }

    #[tokio::test]
    async fn test_load_empty() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.active_trip().load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let trip = running_trip("trip-1");

        db.active_trip().save(&trip).await.unwrap();
        let loaded = db.active_trip().load().await.unwrap().unwrap();

        assert_eq!(loaded, trip);
    }

    #[tokio::test]
    async fn test_save_overwrites_single_slot() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.active_trip();

        repo.save(&running_trip("trip-1")).await.unwrap();
        repo.save(&running_trip("trip-2")).await.unwrap();

        let loaded = repo.load().await.unwrap().unwrap();
        assert_eq!(loaded.trip_id, "trip-2");

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM active_trip")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.active_trip();

        repo.save(&running_trip("trip-1")).await.unwrap();
        assert!(repo.clear().await.unwrap());
        assert!(!repo.clear().await.unwrap());
        assert!(repo.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_reported() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        sqlx::query(
            "INSERT INTO active_trip (slot, trip_id, context, snapshot, updated_at) \
             VALUES (1, 't', '{}', 'not json', 'now')",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let err = db.active_trip().load().await.unwrap_err();
        assert!(matches!(err, DbError::Serialization(_)));
    }
}
