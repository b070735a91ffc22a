//! Shared state handed to every HTTP handler.

use std::sync::Arc;

use crate::aggregate::AggregationEngine;
use crate::channel::LocalFeed;
use crate::models::{AnomalySnapshot, DeviceStateSnapshot};
use crate::reconciler::ReconcilerHandle;
use crate::report::ReportCompiler;
use crate::store::{MemoryStore, PgStore, PositionStore, ReadingStore, RosterSource};

// ---

/// The three persistence seams, backed by one store.
#[derive(Clone)]
pub struct Stores {
    pub readings: Arc<dyn ReadingStore>,
    pub roster: Arc<dyn RosterSource>,
    pub positions: Arc<dyn PositionStore>,
}

impl Stores {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            readings: store.clone(),
            roster: store.clone(),
            positions: store,
        }
    }

    pub fn postgres(store: PgStore) -> Self {
        let store = Arc::new(store);
        Self {
            readings: store.clone(),
            roster: store.clone(),
            positions: store,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub engine: AggregationEngine,
    pub reports: ReportCompiler,
    pub reconciler: ReconcilerHandle,
    pub anomaly_feed: LocalFeed<AnomalySnapshot>,
    pub device_feed: LocalFeed<DeviceStateSnapshot>,
}
