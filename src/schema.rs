//! Database schema management for `codemetal-fieldstate`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs` when a database is configured.

use sqlx::PgPool;

use crate::error::Result;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates the append-only `readings` table, the `sensor_roster` table and
/// the `sensor_positions` override table. Safe to call on every startup;
/// no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readings (
            id           BIGSERIAL PRIMARY KEY,
            sensor_id    TEXT             NOT NULL,
            metric_type  TEXT             NOT NULL,
            value        DOUBLE PRECISION NOT NULL,
            unit         TEXT             NOT NULL,
            recorded_at  TIMESTAMPTZ      NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_roster (
            metric_type  TEXT        NOT NULL,
            sensor_id    TEXT        NOT NULL,
            added_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (metric_type, sensor_id)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Only user-set positions survive restarts; everything else is rebuilt
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_positions (
            sensor_id   TEXT PRIMARY KEY,
            lat         DOUBLE PRECISION NOT NULL,
            lng         DOUBLE PRECISION NOT NULL,
            updated_at  TIMESTAMPTZ      NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_readings_metric_time
            ON readings (metric_type, recorded_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_readings_sensor_time
            ON readings (sensor_id, recorded_at DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
