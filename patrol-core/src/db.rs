use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Tables for pilot registrations and patrol rows. Idempotent.
///
/// The partial unique index keeps at most one open patrol per user even if two
/// start requests race past the in-memory registry.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pilots (
    user_key      TEXT PRIMARY KEY,
    external_id   TEXT NOT NULL,
    callsign      TEXT NOT NULL,
    registered_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS patrols (
    id             BIGSERIAL PRIMARY KEY,
    user_key       TEXT NOT NULL,
    external_id    TEXT NOT NULL,
    callsign       TEXT,
    start_time     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    end_time       TIMESTAMPTZ,
    active_seconds BIGINT NOT NULL DEFAULT 0,
    aircraft       TEXT,
    armament       TEXT,
    status         TEXT,
    base_takeoff   TEXT,
    base_landed    TEXT,
    notes          TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS patrols_one_open_per_user
    ON patrols (user_key) WHERE end_time IS NULL;
"#;

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}
