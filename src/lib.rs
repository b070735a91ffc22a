//! Field state core for the irrigation monitoring backend.
//!
//! Merges three independently scheduled sources (the sensor roster, latest
//! readings and pushed anomaly flags) into one consistent record per sensor,
//! turns signal transitions into deduplicated notifications, rolls readings
//! up by calendar period and compiles periodic reports.
//!
//! This crate follows the Explicit Module Boundary Pattern (EMBP): each
//! module exposes its public surface through the re-exports below, and
//! `main.rs` wires them together without reaching into module internals.

pub mod aggregate;
pub mod channel;
pub mod collector;
pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod reconciler;
pub mod registry;
pub mod report;
pub mod routes;
pub mod schema;
pub mod state;
pub mod store;
pub mod upstream;

pub use aggregate::{AggregateQuery, AggregationEngine};
pub use channel::{AnomalyChannel, DeviceStateChannel, LocalFeed, SnapshotChannel, Subscription};
pub use collector::{Collector, CollectorIntervals};
pub use config::Config;
pub use error::{Error, Result};
pub use models::{
    AnomalySnapshot, Bucket, DeviceState, DeviceStateSnapshot, Granularity, HealthTally,
    MetricType, Position, Reading, SensorDescriptor, SensorRecord, SensorStatus, SensorType,
};
pub use notify::{Deduplicator, NotificationEvent, Severity};
pub use reconciler::{Reconciler, ReconcilerHandle};
pub use registry::{AnomalyBindings, SensorRegistry};
pub use report::{Insights, Report, ReportCompiler, FALLBACK_NARRATIVE, INSIGHT_MONTHS};
pub use state::{AppState, Stores};
pub use store::{MemoryStore, PgStore, PositionStore, ReadingStore, RosterSource};
pub use upstream::{
    HealthTallySource, HttpHealthTally, HttpNarrativeGenerator, NarrativeGenerator,
    StaticHealthTally, UnconfiguredNarrative,
};
