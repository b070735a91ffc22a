//! In-memory store used when no database is configured.
//!
//! Queries copy what they need out of the read lock and compute afterwards,
//! so aggregation never holds up ingestion.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{PositionStore, ReadingStore, RosterSource};
use crate::error::{Error, Result};
use crate::models::{MetricType, Position, Reading};

#[derive(Debug, Default)]
pub struct MemoryStore {
    readings: RwLock<Vec<Reading>>,
    roster: RwLock<BTreeMap<MetricType, Vec<String>>>,
    positions: RwLock<HashMap<String, Position>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn append(&self, reading: &Reading) -> Result<()> {
        self.readings.write().await.push(reading.clone());
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
        let mut matched: Vec<Reading> = {
            let readings = self.readings.read().await;
            readings
                .iter()
                .filter(|r| r.metric_type == metric)
                .filter(|r| sensor_id.map_or(true, |id| r.sensor_id == id))
                .filter(|r| r.timestamp >= start && r.timestamp < end)
                .cloned()
                .collect()
        };
        matched.sort_by_key(|r| r.timestamp);
        Ok(matched)
    }

    async fn latest(&self, metric: MetricType) -> Result<Vec<Reading>> {
        // ---
        let readings = self.readings.read().await;
        let mut newest: BTreeMap<&str, &Reading> = BTreeMap::new();
        for reading in readings.iter().filter(|r| r.metric_type == metric) {
            let entry = newest.entry(reading.sensor_id.as_str()).or_insert(reading);
            if reading.timestamp >= entry.timestamp {
                *entry = reading;
            }
        }
        Ok(newest.into_values().cloned().collect())
    }
}

#[async_trait]
impl RosterSource for MemoryStore {
    async fn list_sensors(&self, metric: MetricType) -> Result<Vec<String>> {
        let roster = self.roster.read().await;
        Ok(roster.get(&metric).cloned().unwrap_or_default())
    }

    async fn add_sensor(&self, metric: MetricType, sensor_id: &str) -> Result<()> {
        // ---
        let mut roster = self.roster.write().await;
        let sensors = roster.entry(metric).or_default();
        if sensors.iter().any(|s| s == sensor_id) {
            return Err(Error::Conflict(format!(
                "sensor {sensor_id} already exists in {metric} list"
            )));
        }
        sensors.push(sensor_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn load_all(&self) -> Result<HashMap<String, Position>> {
        Ok(self.positions.read().await.clone())
    }

    async fn save(&self, sensor_id: &str, position: Position) -> Result<()> {
        self.positions
            .write()
            .await
            .insert(sensor_id.to_string(), position);
        Ok(())
    }

    async fn remove(&self, sensor_id: &str) -> Result<bool> {
        Ok(self.positions.write().await.remove(sensor_id).is_some())
    }
}
