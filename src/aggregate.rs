//! Calendar rollups of raw readings.
//!
//! Readings in an inclusive date range are grouped by the UTC calendar key
//! of their own timestamp and reduced to count / mean / min / max.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{Bucket, Granularity, MetricType, Reading};
use crate::store::ReadingStore;

// ---

/// Parameters of one aggregation request.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregateQuery {
    pub metric: MetricType,
    /// `None` aggregates across every sensor of the metric.
    pub sensor_id: Option<String>,
    pub start: NaiveDate,
    /// Inclusive: readings from the whole end day are counted.
    pub end: NaiveDate,
    pub granularity: Granularity,
}

#[derive(Clone)]
pub struct AggregationEngine {
    store: Arc<dyn ReadingStore>,
}

impl AggregationEngine {
    pub fn new(store: Arc<dyn ReadingStore>) -> Self {
        Self { store }
    }

    /// Ordered buckets for `query`. An empty range yields no buckets.
    pub async fn aggregate(&self, query: &AggregateQuery) -> Result<Vec<Bucket>> {
        // ---
        let (from, until) = day_bounds(query.start, query.end)?;
        let readings = self
            .store
            .query(query.metric, query.sensor_id.as_deref(), from, until)
            .await?;

        let buckets = rollup(&readings, query.granularity);
        debug!(
            "Aggregated {} {} reading(s) into {} bucket(s) ({:?}, {}..={})",
            readings.len(),
            query.metric,
            buckets.len(),
            query.granularity,
            query.start,
            query.end
        );
        Ok(buckets)
    }
}

/// Convert an inclusive date range into a half-open instant range.
pub fn day_bounds(start: NaiveDate, end: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    // ---
    if start > end {
        return Err(Error::InvalidRange { start, end });
    }
    let after_end = end
        .succ_opt()
        .ok_or_else(|| Error::InvalidInput(format!("end date {end} is out of range")))?;

    Ok((
        start.and_time(NaiveTime::MIN).and_utc(),
        after_end.and_time(NaiveTime::MIN).and_utc(),
    ))
}

/// Group readings into buckets ordered by key.
pub fn rollup(readings: &[Reading], granularity: Granularity) -> Vec<Bucket> {
    // ---
    let mut groups: BTreeMap<String, Accumulator> = BTreeMap::new();
    let format = granularity.key_format();

    for reading in readings {
        let key = reading.timestamp.format(format).to_string();
        groups
            .entry(key)
            .or_insert_with(|| Accumulator::new(reading.value))
            .add(reading.value);
    }

    groups
        .into_iter()
        .map(|(bucket_key, acc)| acc.finish(bucket_key))
        .collect()
}

#[derive(Debug)]
struct Accumulator {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Accumulator {
    fn new(first: f64) -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: first,
            max: first,
        }
    }

    fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn finish(self, bucket_key: String) -> Bucket {
        // Rounding in the sum must not push the mean outside [min, max]
        let avg = (self.sum / self.count as f64).clamp(self.min, self.max);
        Bucket {
            bucket_key,
            count: self.count,
            avg,
            min: self.min,
            max: self.max,
        }
    }
}
