//! Periodic field report.
//!
//! A report covers the last N calendar months: monthly temperature and
//! humidity rollups, the plant health tally and a generated narrative. The
//! narrative is best effort; a generator failure is replaced by
//! [`FALLBACK_NARRATIVE`] and never fails the report.

use std::sync::Arc;

use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregate::{AggregateQuery, AggregationEngine};
use crate::error::{Error, Result};
use crate::models::{Bucket, Granularity, HealthTally, MetricType};
use crate::upstream::{HealthTallySource, NarrativeGenerator};

// ---

/// Narrative used when generation fails.
pub const FALLBACK_NARRATIVE: &str = "No insights available";

/// Months covered by a standalone insight request.
pub const INSIGHT_MONTHS: u32 = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoints {
    pub temperature: usize,
    pub humidity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMeta {
    /// e.g. "3 month(s)"
    pub period_label: String,
    pub data_points: DataPoints,
}

/// An assembled report. Never modified after compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub period: ReportPeriod,
    pub temperature_aggregates: Vec<Bucket>,
    pub humidity_aggregates: Vec<Bucket>,
    pub health_tally: HealthTally,
    pub narrative: String,
    pub generated_at: DateTime<Utc>,
    pub meta: ReportMeta,
}

/// Standalone narrative over recent monthly rollups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insights {
    pub period: ReportPeriod,
    pub narrative: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ReportCompiler {
    engine: AggregationEngine,
    health: Arc<dyn HealthTallySource>,
    narrative: Arc<dyn NarrativeGenerator>,
}

impl ReportCompiler {
    pub fn new(
        engine: AggregationEngine,
        health: Arc<dyn HealthTallySource>,
        narrative: Arc<dyn NarrativeGenerator>,
    ) -> Self {
        Self {
            engine,
            health,
            narrative,
        }
    }

    /// Compile a report covering the last `period_months` months.
    pub async fn compile(&self, period_months: u32) -> Result<Report> {
        self.compile_at(period_months, Utc::now()).await
    }

    /// Compile as if the current instant were `now`. No retries are made.
    pub async fn compile_at(&self, period_months: u32, now: DateTime<Utc>) -> Result<Report> {
        // ---
        let period = window(period_months, now)?;
        let ((temperature, humidity), health_tally) =
            tokio::try_join!(self.monthly_rollups(&period), self.health.counts())?;

        let narrative = self.narrate(&temperature, &humidity).await;

        info!(
            "Compiled {}-month report ({}..={}, {} temperature / {} humidity bucket(s))",
            period_months,
            period.start,
            period.end,
            temperature.len(),
            humidity.len()
        );

        Ok(Report {
            meta: ReportMeta {
                period_label: format!("{period_months} month(s)"),
                data_points: DataPoints {
                    temperature: temperature.len(),
                    humidity: humidity.len(),
                },
            },
            period,
            temperature_aggregates: temperature,
            humidity_aggregates: humidity,
            health_tally,
            narrative,
            generated_at: now,
        })
    }

    /// Narrative over the last [`INSIGHT_MONTHS`] months, without the tally.
    pub async fn insights(&self) -> Result<Insights> {
        self.insights_at(Utc::now()).await
    }

    pub async fn insights_at(&self, now: DateTime<Utc>) -> Result<Insights> {
        // ---
        let period = window(INSIGHT_MONTHS, now)?;
        let (temperature, humidity) = self.monthly_rollups(&period).await?;
        let narrative = self.narrate(&temperature, &humidity).await;
        debug!("Generated insights for {}..={}", period.start, period.end);

        Ok(Insights {
            period,
            narrative,
            generated_at: now,
        })
    }

    /// Current plant health tally, passed through from the source.
    pub async fn health_tally(&self) -> Result<HealthTally> {
        self.health.counts().await
    }

    async fn monthly_rollups(&self, period: &ReportPeriod) -> Result<(Vec<Bucket>, Vec<Bucket>)> {
        // ---
        let monthly = |metric: MetricType| AggregateQuery {
            metric,
            sensor_id: None,
            start: period.start,
            end: period.end,
            granularity: Granularity::Month,
        };
        let temperature_query = monthly(MetricType::Temperature);
        let humidity_query = monthly(MetricType::Humidity);

        tokio::try_join!(
            self.engine.aggregate(&temperature_query),
            self.engine.aggregate(&humidity_query),
        )
    }

    async fn narrate(&self, temperature: &[Bucket], humidity: &[Bucket]) -> String {
        let prompt = build_prompt(temperature, humidity);
        match self.narrative.generate(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Using fallback narrative: {}", e);
                FALLBACK_NARRATIVE.to_string()
            }
        }
    }
}

/// `[today - months, today]` in UTC calendar dates.
fn window(months: u32, now: DateTime<Utc>) -> Result<ReportPeriod> {
    if months == 0 {
        return Err(Error::InvalidPeriod(months));
    }
    let end = now.date_naive();
    let start = end
        .checked_sub_months(Months::new(months))
        .ok_or(Error::InvalidPeriod(months))?;
    Ok(ReportPeriod { start, end })
}

/// Prompt asking for farmer-friendly insight into the monthly rollups.
pub fn build_prompt(temperature: &[Bucket], humidity: &[Bucket]) -> String {
    // ---
    let mut prompt = String::from(
        "You are an assistant giving farmers plain-language insight into soil \
         moisture (percent) and temperature (celsius).\n\n",
    );
    prompt.push_str("Monthly temperature (celsius):\n");
    push_buckets(&mut prompt, temperature);
    prompt.push_str("\nMonthly soil moisture (percent):\n");
    push_buckets(&mut prompt, humidity);
    prompt.push_str(
        "\nExplain what these values mean, give practical irrigation advice, \
         point out risks such as overwatering, drought or extreme temperatures, \
         and note any seasonal patterns. Format the answer as markdown.",
    );
    prompt
}

fn push_buckets(prompt: &mut String, buckets: &[Bucket]) {
    if buckets.is_empty() {
        prompt.push_str("- no data\n");
    }
    for b in buckets {
        prompt.push_str(&format!(
            "- {}: avg {:.2}, min {:.2}, max {:.2} ({} readings)\n",
            b.bucket_key, b.avg, b.min, b.max, b.count
        ));
    }
}
