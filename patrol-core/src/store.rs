//! Durable store adapter
//!
//! `SessionStore` is the narrow surface the monitor needs; `PatrolStore` adds
//! the row lifecycle the patrol start/end path uses. `PgPatrolStore` backs both
//! with the `pilots` and `patrols` tables created by [`crate::db::ensure_schema`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::PatrolError;
use crate::models::{ActiveSessionRow, PatrolDebrief, Pilot};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Every patrol row whose end time is still null.
    async fn restore_active_sessions(&self) -> Result<Vec<ActiveSessionRow>, PatrolError>;

    /// Persist the accumulator. Never lowers the stored value.
    async fn write_active_seconds(&self, record_id: i64, seconds: i64) -> Result<(), PatrolError>;

    async fn update_callsign(&self, record_id: i64, callsign: &str) -> Result<(), PatrolError>;
}

#[async_trait]
pub trait PatrolStore: SessionStore {
    /// Insert or replace a registration.
    async fn upsert_pilot(
        &self,
        user_key: &str,
        external_id: &str,
        callsign: &str,
    ) -> Result<Pilot, PatrolError>;

    async fn find_pilot(&self, user_key: &str) -> Result<Option<Pilot>, PatrolError>;

    /// Open a patrol row and return its id. Fails with `DuplicateSession`
    /// when the user already has an open row.
    async fn create_patrol(
        &self,
        pilot: &Pilot,
        started_at: DateTime<Utc>,
    ) -> Result<i64, PatrolError>;

    /// Close an open patrol row with its final seconds and debrief.
    async fn finish_patrol(
        &self,
        record_id: i64,
        active_seconds: i64,
        ended_at: DateTime<Utc>,
        debrief: &PatrolDebrief,
    ) -> Result<(), PatrolError>;

    /// Delete an open row that never made it into the registry.
    async fn discard_patrol(&self, record_id: i64) -> Result<(), PatrolError>;
}

#[derive(Debug, Clone)]
pub struct PgPatrolStore {
    pool: PgPool,
}

impl PgPatrolStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgPatrolStore {
    async fn restore_active_sessions(&self) -> Result<Vec<ActiveSessionRow>, PatrolError> {
        let rows: Vec<ActiveSessionRow> = sqlx::query_as(
            r#"
            SELECT id AS record_id, user_key, external_id, start_time, active_seconds, callsign
            FROM patrols
            WHERE end_time IS NULL
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn write_active_seconds(&self, record_id: i64, seconds: i64) -> Result<(), PatrolError> {
        let result = sqlx::query(
            "UPDATE patrols SET active_seconds = GREATEST(active_seconds, $1) WHERE id = $2",
        )
        .bind(seconds)
        .bind(record_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(record_id, "Checkpoint matched no patrol row");
        }
        Ok(())
    }

    async fn update_callsign(&self, record_id: i64, callsign: &str) -> Result<(), PatrolError> {
        sqlx::query("UPDATE patrols SET callsign = $1 WHERE id = $2")
            .bind(callsign)
            .bind(record_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PatrolStore for PgPatrolStore {
    async fn upsert_pilot(
        &self,
        user_key: &str,
        external_id: &str,
        callsign: &str,
    ) -> Result<Pilot, PatrolError> {
        let pilot: Pilot = sqlx::query_as(
            r#"
            INSERT INTO pilots (user_key, external_id, callsign)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_key) DO UPDATE
                SET external_id = EXCLUDED.external_id,
                    callsign = EXCLUDED.callsign,
                    registered_at = NOW()
            RETURNING user_key, external_id, callsign, registered_at
            "#,
        )
        .bind(user_key)
        .bind(external_id)
        .bind(callsign)
        .fetch_one(&self.pool)
        .await?;

        Ok(pilot)
    }

    async fn find_pilot(&self, user_key: &str) -> Result<Option<Pilot>, PatrolError> {
        let pilot: Option<Pilot> = sqlx::query_as(
            "SELECT user_key, external_id, callsign, registered_at FROM pilots WHERE user_key = $1",
        )
        .bind(user_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(pilot)
    }

    async fn create_patrol(
        &self,
        pilot: &Pilot,
        started_at: DateTime<Utc>,
    ) -> Result<i64, PatrolError> {
        let inserted: Result<(i64,), sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO patrols (user_key, external_id, callsign, start_time)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&pilot.user_key)
        .bind(&pilot.external_id)
        .bind(&pilot.callsign)
        .bind(started_at)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok((id,)) => Ok(id),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(PatrolError::DuplicateSession {
                    user_key: pilot.user_key.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn finish_patrol(
        &self,
        record_id: i64,
        active_seconds: i64,
        ended_at: DateTime<Utc>,
        debrief: &PatrolDebrief,
    ) -> Result<(), PatrolError> {
        let result = sqlx::query(
            r#"
            UPDATE patrols
            SET end_time = $1,
                active_seconds = GREATEST(active_seconds, $2),
                aircraft = $3,
                armament = $4,
                status = $5,
                base_takeoff = $6,
                base_landed = $7,
                notes = $8
            WHERE id = $9 AND end_time IS NULL
            "#,
        )
        .bind(ended_at)
        .bind(active_seconds)
        .bind(&debrief.aircraft)
        .bind(&debrief.armament)
        .bind(&debrief.status)
        .bind(&debrief.base_takeoff)
        .bind(&debrief.base_landed)
        .bind(&debrief.notes)
        .bind(record_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PatrolError::StorageWrite {
                record_id,
                reason: "no open patrol row".to_string(),
            });
        }
        Ok(())
    }

    async fn discard_patrol(&self, record_id: i64) -> Result<(), PatrolError> {
        sqlx::query("DELETE FROM patrols WHERE id = $1 AND end_time IS NULL")
            .bind(record_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
