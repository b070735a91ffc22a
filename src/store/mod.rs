//! Persistence seams for readings, the sensor roster and position overrides.
//!
//! Every trait here has two implementations: [`PgStore`] for deployments with
//! a `DATABASE_URL`, and [`MemoryStore`] for local runs and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{MetricType, Position, Reading};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

/// Append-only repository of timestamped readings.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Store a reading. Readings are never updated or deleted.
    async fn append(&self, reading: &Reading) -> Result<()>;

    /// Readings of `metric` with `start <= timestamp < end`, oldest first,
    /// optionally narrowed to one sensor.
    async fn query(
        &self,
        metric: MetricType,
        sensor_id: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>>;

    /// Newest reading of each sensor reporting `metric`, ordered by sensor id.
    async fn latest(&self, metric: MetricType) -> Result<Vec<Reading>>;
}

/// The list of known physical sensors per metric type.
#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn list_sensors(&self, metric: MetricType) -> Result<Vec<String>>;

    /// Register a sensor. Fails with `Conflict` if it is already listed.
    async fn add_sensor(&self, metric: MetricType, sensor_id: &str) -> Result<()>;
}

/// Durable user-set sensor positions keyed by sensor id.
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn load_all(&self) -> Result<HashMap<String, Position>>;

    async fn save(&self, sensor_id: &str, position: Position) -> Result<()>;

    /// Returns whether an override existed.
    async fn remove(&self, sensor_id: &str) -> Result<bool>;
}
