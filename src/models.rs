//! Data models shared by the store, the reconciler and the HTTP layer.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

// ---

/// Kind of physical quantity a reading measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Temperature,
    Humidity,
}

impl MetricType {
    /// Every metric type, in roster polling order.
    pub const ALL: [MetricType; 2] = [MetricType::Temperature, MetricType::Humidity];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Temperature => "temperature",
            MetricType::Humidity => "humidity",
        }
    }

    /// Unit recorded when the ingesting caller does not name one.
    pub fn default_unit(&self) -> &'static str {
        match self {
            MetricType::Temperature => "celsius",
            MetricType::Humidity => "percent",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temperature" => Ok(MetricType::Temperature),
            "humidity" => Ok(MetricType::Humidity),
            other => Err(Error::InvalidInput(format!(
                "metric type must be temperature or humidity, got '{other}'"
            ))),
        }
    }
}

/// A stored sensor reading. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    // ---
    pub sensor_id: String,
    pub metric_type: MetricType,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// Create a reading with the metric's default unit.
    pub fn new(
        sensor_id: impl Into<String>,
        metric_type: MetricType,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        // ---
        Self {
            sensor_id: sensor_id.into(),
            metric_type,
            value,
            unit: metric_type.default_unit().to_string(),
            timestamp,
        }
    }
}

/// Calendar granularity of an aggregation bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Month,
    Year,
}

impl Granularity {
    /// `chrono` format string producing the bucket key.
    pub fn key_format(&self) -> &'static str {
        match self {
            Granularity::Day => "%Y-%m-%d",
            Granularity::Month => "%Y-%m",
            Granularity::Year => "%Y",
        }
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Granularity::Day),
            "month" => Ok(Granularity::Month),
            "year" => Ok(Granularity::Year),
            other => Err(Error::InvalidInput(format!(
                "granularity must be day, month or year, got '{other}'"
            ))),
        }
    }
}

/// One aggregation row. Never produced for an empty group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    // ---
    pub bucket_key: String,
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

/// Latest known value of each tracked anomaly flag.
///
/// A flag absent from the map is unset, which is distinct from `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnomalySnapshot {
    flags: BTreeMap<String, bool>,
}

impl AnomalySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when the flag has never been published.
    pub fn get(&self, metric: &str) -> Option<bool> {
        self.flags.get(metric).copied()
    }

    pub fn set(&mut self, metric: impl Into<String>, value: bool) {
        self.flags.insert(metric.into(), value);
    }

    /// Overwrite every flag named in `update`, leaving the others alone.
    pub fn merge(&mut self, update: &AnomalySnapshot) {
        for (metric, value) in &update.flags {
            self.flags.insert(metric.clone(), *value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.flags.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, bool)> for AnomalySnapshot {
    fn from_iter<I: IntoIterator<Item = (K, bool)>>(iter: I) -> Self {
        Self {
            flags: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Raw device-state feed contents: device id to published state string.
pub type DeviceStateSnapshot = BTreeMap<String, String>;

/// Recognized relay suggestion states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    On,
    Off,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::On => "on",
            DeviceState::Off => "off",
        }
    }
}

impl FromStr for DeviceState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(DeviceState::On),
            "off" => Ok(DeviceState::Off),
            _ => Err(Error::UnknownSignal(format!("device state '{s}'"))),
        }
    }
}

/// A roster entry, normalized at the registry boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    // ---
    pub id: String,
    pub name: String,
    pub metric_type: Option<MetricType>,
}

impl SensorDescriptor {
    /// Roster lists carry bare ids, which double as display names.
    pub fn from_roster(id: impl Into<String>, metric_type: MetricType) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            metric_type: Some(metric_type),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    Temperature,
    Humidity,
    Other,
}

impl From<MetricType> for SensorType {
    fn from(metric: MetricType) -> Self {
        match metric {
            MetricType::Temperature => SensorType::Temperature,
            MetricType::Humidity => SensorType::Humidity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    Normal,
    Alert,
}

/// Geographic coordinates in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

impl Position {
    /// Reject coordinates outside the WGS84 range.
    pub fn validate(&self) -> Result<(), Error> {
        // ---
        let lat_ok = self.lat.is_finite() && (-90.0..=90.0).contains(&self.lat);
        let lng_ok = self.lng.is_finite() && (-180.0..=180.0).contains(&self.lng);
        if lat_ok && lng_ok {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "position out of range: lat={}, lng={}",
                self.lat, self.lng
            )))
        }
    }
}

/// The reconciled view of one physical sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    // ---
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    /// `None` until the first reading arrives.
    pub value: Option<f64>,
    pub status: SensorStatus,
    pub position: Option<Position>,
    /// True while the position is synthesized rather than user-set.
    pub position_placeholder: bool,
    pub color_tag: String,
}

/// Plant health classification counts from the disease detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthTally {
    pub healthy: u64,
    pub unhealthy: u64,
    pub total: u64,
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_metric_type_parsing() {
        // ---
        assert_eq!("temperature".parse::<MetricType>().unwrap(), MetricType::Temperature);
        assert_eq!("humidity".parse::<MetricType>().unwrap(), MetricType::Humidity);
        assert!("relay".parse::<MetricType>().is_err());
    }

    #[test]
    fn test_default_units() {
        // ---
        let reading = Reading::new("temp1", MetricType::Temperature, 21.0, Utc::now());
        assert_eq!(reading.unit, "celsius");
        assert_eq!(MetricType::Humidity.default_unit(), "percent");
    }

    #[test]
    fn test_anomaly_snapshot_unset_is_not_false() {
        // ---
        let mut snapshot = AnomalySnapshot::new();
        assert_eq!(snapshot.get("soil_moisture"), None);

        snapshot.set("soil_moisture", false);
        assert_eq!(snapshot.get("soil_moisture"), Some(false));
    }

    #[test]
    fn test_anomaly_snapshot_merge_keeps_other_flags() {
        // ---
        let mut snapshot: AnomalySnapshot =
            [("soil_moisture", true), ("temperature", false)].into_iter().collect();
        let update: AnomalySnapshot = [("temperature", true)].into_iter().collect();

        snapshot.merge(&update);

        assert_eq!(snapshot.get("soil_moisture"), Some(true));
        assert_eq!(snapshot.get("temperature"), Some(true));
    }

    #[test]
    fn test_anomaly_snapshot_serializes_as_plain_map() {
        // ---
        let snapshot: AnomalySnapshot = [("soil_moisture", true)].into_iter().collect();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json, serde_json::json!({ "soil_moisture": true }));
    }

    #[test]
    fn test_device_state_parsing() {
        // ---
        assert_eq!(" ON ".parse::<DeviceState>().unwrap(), DeviceState::On);
        assert_eq!("off".parse::<DeviceState>().unwrap(), DeviceState::Off);
        assert!(matches!(
            "maybe".parse::<DeviceState>(),
            Err(Error::UnknownSignal(_))
        ));
    }

    #[test]
    fn test_position_validation() {
        // ---
        assert!(Position { lat: 28.6, lng: 77.2 }.validate().is_ok());
        assert!(Position { lat: 91.0, lng: 0.0 }.validate().is_err());
        assert!(Position { lat: 0.0, lng: f64::NAN }.validate().is_err());
    }

    #[test]
    fn test_sensor_record_serializes_type_field() {
        // ---
        let record = SensorRecord {
            id: "temp1".to_string(),
            name: "temp1".to_string(),
            sensor_type: SensorType::Temperature,
            value: Some(22.5),
            status: SensorStatus::Normal,
            position: None,
            position_placeholder: false,
            color_tag: "#3388ff".to_string(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "temperature");
        assert_eq!(json["status"], "normal");
    }
}
