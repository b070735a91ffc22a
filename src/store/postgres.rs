//! Postgres-backed store. Tables are created by [`crate::schema::create_schema`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::{PositionStore, ReadingStore, RosterSource};
use crate::error::{Error, Result};
use crate::models::{MetricType, Position, Reading};

// ---

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

/// Row shape shared by the reading queries. The metric type is always a
/// query parameter, so it is not selected back.
#[derive(Debug, sqlx::FromRow)]
struct ReadingRow {
    sensor_id: String,
    value: f64,
    unit: String,
    recorded_at: DateTime<Utc>,
}

impl ReadingRow {
    fn into_reading(self, metric_type: MetricType) -> Reading {
        Reading {
            sensor_id: self.sensor_id,
            metric_type,
            value: self.value,
            unit: self.unit,
            timestamp: self.recorded_at,
        }
    }
}

impl PgStore {
    /// Open a connection pool against `db_url`.
    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self> {
        // ---
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ReadingStore for PgStore {
    async fn append(&self, reading: &Reading) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO readings (sensor_id, metric_type, value, unit, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&reading.sensor_id)
        .bind(reading.metric_type.as_str())
        .bind(reading.value)
        .bind(&reading.unit)
        .bind(reading.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query(
        &self,
        metric: MetricType,
        sensor_id: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>> {
        // ---
        let rows: Vec<ReadingRow> = sqlx::query_as(
            r#"
            SELECT sensor_id, value, unit, recorded_at
            FROM readings
            WHERE metric_type = $1
              AND recorded_at >= $2
              AND recorded_at <  $3
              AND ($4::TEXT IS NULL OR sensor_id = $4)
            ORDER BY recorded_at
            "#,
        )
        .bind(metric.as_str())
        .bind(start)
        .bind(end)
        .bind(sensor_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_reading(metric)).collect())
    }

    async fn latest(&self, metric: MetricType) -> Result<Vec<Reading>> {
        // ---
        let rows: Vec<ReadingRow> = sqlx::query_as(
            r#"
            SELECT DISTINCT ON (sensor_id) sensor_id, value, unit, recorded_at
            FROM readings
            WHERE metric_type = $1
            ORDER BY sensor_id, recorded_at DESC
            "#,
        )
        .bind(metric.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_reading(metric)).collect())
    }
}

#[async_trait]
impl RosterSource for PgStore {
    async fn list_sensors(&self, metric: MetricType) -> Result<Vec<String>> {
        // ---
        let ids: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT sensor_id FROM sensor_roster
            WHERE metric_type = $1
            ORDER BY added_at, sensor_id
            "#,
        )
        .bind(metric.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn add_sensor(&self, metric: MetricType, sensor_id: &str) -> Result<()> {
        // ---
        let result = sqlx::query(
            r#"
            INSERT INTO sensor_roster (metric_type, sensor_id)
            VALUES ($1, $2)
            ON CONFLICT (metric_type, sensor_id) DO NOTHING
            "#,
        )
        .bind(metric.as_str())
        .bind(sensor_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Conflict(format!(
                "sensor {sensor_id} already exists in {metric} list"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PositionStore for PgStore {
    async fn load_all(&self) -> Result<HashMap<String, Position>> {
        // ---
        let rows: Vec<(String, f64, f64)> =
            sqlx::query_as("SELECT sensor_id, lat, lng FROM sensor_positions")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(id, lat, lng)| (id, Position { lat, lng }))
            .collect())
    }

    async fn save(&self, sensor_id: &str, position: Position) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO sensor_positions (sensor_id, lat, lng, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (sensor_id) DO UPDATE SET
                lat = EXCLUDED.lat,
                lng = EXCLUDED.lng,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(sensor_id)
        .bind(position.lat)
        .bind(position.lng)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, sensor_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sensor_positions WHERE sensor_id = $1")
            .bind(sensor_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
