//! The authoritative sensor map.
//!
//! [`SensorRegistry`] merges roster discoveries, latest-reading updates and
//! anomaly snapshots into one record per sensor id. It is a plain
//! synchronous state machine; the reconciler task owns the only instance.
//!
//! Status is re-derived from the latest anomaly snapshot held here after
//! every kind of update, so the outcome does not depend on which of the
//! three sources happened to arrive first.

use std::collections::{BTreeSet, HashMap};
use std::f64::consts::TAU;

use tracing::debug;

use crate::models::{
    AnomalySnapshot, MetricType, Position, SensorDescriptor, SensorRecord, SensorStatus,
    SensorType,
};

// ---

/// Marker colours handed out by creation order.
pub const COLOR_PALETTE: [&str; 8] = [
    "#3388ff", "#ff3838", "#33ff88", "#ffff33", "#ff33ff", "#33ffff", "#ff8833", "#8833ff",
];

const SLOTS_PER_RING: usize = 8;

/// Roughly 100m of latitude.
const RING_SPACING_DEG: f64 = 0.001;

/// Fixed mapping from sensor id to the anomaly flag that drives its status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnomalyBindings {
    by_sensor: HashMap<String, String>,
}

impl AnomalyBindings {
    pub fn new<I, S, M>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, M)>,
        S: Into<String>,
        M: Into<String>,
    {
        Self {
            by_sensor: pairs
                .into_iter()
                .map(|(s, m)| (s.into(), m.into()))
                .collect(),
        }
    }

    pub fn metric_for(&self, sensor_id: &str) -> Option<&str> {
        self.by_sensor.get(sensor_id).map(String::as_str)
    }

    /// Every tracked metric, sorted.
    pub fn metrics(&self) -> BTreeSet<&str> {
        self.by_sensor.values().map(String::as_str).collect()
    }

    pub fn is_tracked(&self, metric: &str) -> bool {
        self.by_sensor.values().any(|m| m == metric)
    }

    /// Sensor ids bound to `metric`, sorted.
    pub fn sensors_for(&self, metric: &str) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .by_sensor
            .iter()
            .filter(|(_, m)| m.as_str() == metric)
            .map(|(s, _)| s.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.by_sensor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sensor.is_empty()
    }
}

/// Deterministic placeholder around `center`: eight slots per ring, rings
/// growing outwards, so no two indexes share a position.
pub fn placeholder_position(center: Position, index: usize) -> Position {
    // ---
    let ring = (index / SLOTS_PER_RING + 1) as f64;
    let angle = (index % SLOTS_PER_RING) as f64 / SLOTS_PER_RING as f64 * TAU;
    let radius = RING_SPACING_DEG * ring;

    Position {
        lat: center.lat + angle.cos() * radius,
        lng: center.lng + angle.sin() * radius,
    }
}

#[derive(Debug)]
pub struct SensorRegistry {
    records: Vec<SensorRecord>,
    index: HashMap<String, usize>,
    bindings: AnomalyBindings,
    anomaly: AnomalySnapshot,
    overrides: HashMap<String, Position>,
    field_center: Option<Position>,
}

impl SensorRegistry {
    /// `overrides` are the persisted user-set positions.
    pub fn new(
        bindings: AnomalyBindings,
        field_center: Option<Position>,
        overrides: HashMap<String, Position>,
    ) -> Self {
        Self {
            records: Vec::new(),
            index: HashMap::new(),
            bindings,
            anomaly: AnomalySnapshot::new(),
            overrides,
            field_center,
        }
    }

    pub fn bindings(&self) -> &AnomalyBindings {
        &self.bindings
    }

    /// Create records for roster entries not seen before. Returns how many
    /// were created.
    pub fn on_roster_discovered(&mut self, descriptors: &[SensorDescriptor]) -> usize {
        // ---
        let mut created = 0;
        for descriptor in descriptors {
            match self.index.get(&descriptor.id).copied() {
                Some(idx) => {
                    let record = &mut self.records[idx];
                    if record.sensor_type == SensorType::Other {
                        if let Some(metric) = descriptor.metric_type {
                            record.sensor_type = metric.into();
                        }
                    }
                }
                None => {
                    let sensor_type = descriptor
                        .metric_type
                        .map_or(SensorType::Other, SensorType::from);
                    self.create(&descriptor.id, &descriptor.name, sensor_type);
                    created += 1;
                }
            }
        }
        created
    }

    /// Record the newest value of a sensor, creating it if unseen. The type
    /// follows the metric of the latest reading, unlike roster entries which
    /// only fill in an unknown type.
    pub fn on_reading_update(&mut self, sensor_id: &str, value: f64, metric: MetricType) {
        // ---
        let idx = match self.index.get(sensor_id).copied() {
            Some(idx) => idx,
            None => self.create(sensor_id, sensor_id, metric.into()),
        };
        let record = &mut self.records[idx];
        record.value = Some(value);
        record.sensor_type = metric.into();
    }

    /// Adopt `snapshot` as the latest anomaly state and re-derive the status
    /// of every bound sensor. Returns the ids whose status changed.
    pub fn on_anomaly_snapshot(&mut self, snapshot: &AnomalySnapshot) -> Vec<String> {
        // ---
        self.anomaly = snapshot.clone();

        let mut changed = Vec::new();
        for idx in 0..self.records.len() {
            if self.apply_anomaly(idx) {
                changed.push(self.records[idx].id.clone());
            }
        }
        changed
    }

    /// Explicitly place a sensor. The position is kept even if the sensor has
    /// not been discovered yet. Returns whether the sensor is known.
    pub fn set_position(&mut self, sensor_id: &str, position: Position) -> bool {
        // ---
        self.overrides.insert(sensor_id.to_string(), position);
        match self.index.get(sensor_id).copied() {
            Some(idx) => {
                let record = &mut self.records[idx];
                record.position = Some(position);
                record.position_placeholder = false;
                true
            }
            None => false,
        }
    }

    /// Drop a user-set position and fall back to the synthesized one.
    /// Returns whether the sensor is known.
    pub fn reset_position(&mut self, sensor_id: &str) -> bool {
        // ---
        self.overrides.remove(sensor_id);
        match self.index.get(sensor_id).copied() {
            Some(idx) => {
                let record = &mut self.records[idx];
                record.position = self.field_center.map(|c| placeholder_position(c, idx));
                record.position_placeholder = true;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, sensor_id: &str) -> Option<&SensorRecord> {
        self.index.get(sensor_id).map(|&idx| &self.records[idx])
    }

    /// All records in creation order.
    pub fn snapshot_all(&self) -> Vec<SensorRecord> {
        self.records.clone()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn create(&mut self, sensor_id: &str, name: &str, sensor_type: SensorType) -> usize {
        // ---
        let idx = self.records.len();
        let (position, position_placeholder) = match self.overrides.get(sensor_id) {
            Some(&saved) => (Some(saved), false),
            None => (
                self.field_center.map(|c| placeholder_position(c, idx)),
                true,
            ),
        };

        self.records.push(SensorRecord {
            id: sensor_id.to_string(),
            name: name.to_string(),
            sensor_type,
            value: None,
            status: SensorStatus::Normal,
            position,
            position_placeholder,
            color_tag: COLOR_PALETTE[idx % COLOR_PALETTE.len()].to_string(),
        });
        self.index.insert(sensor_id.to_string(), idx);
        self.apply_anomaly(idx);

        debug!("Registered sensor {} ({:?})", sensor_id, sensor_type);
        idx
    }

    /// Derive status from the held snapshot. Unbound sensors are untouched.
    fn apply_anomaly(&mut self, idx: usize) -> bool {
        // ---
        let record = &mut self.records[idx];
        let Some(metric) = self.bindings.metric_for(&record.id) else {
            return false;
        };
        let status = if self.anomaly.get(metric) == Some(true) {
            SensorStatus::Alert
        } else {
            SensorStatus::Normal
        };
        let changed = record.status != status;
        record.status = status;
        changed
    }
}
