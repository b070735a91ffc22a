//! Background collectors feeding the reconciler.
//!
//! Two pollers (roster and latest readings) run on fixed intervals and two
//! pumps forward pushed snapshots (anomaly flags and device states). A failed
//! cycle is skipped and retried on the next tick; the reconciler keeps
//! serving its last-known state in the meantime.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::{AnomalyChannel, DeviceStateChannel, SnapshotChannel};
use crate::error::{Error, Result};
use crate::models::{MetricType, SensorDescriptor};
use crate::reconciler::ReconcilerHandle;
use crate::store::{ReadingStore, RosterSource};

// ---

#[derive(Debug, Clone, Copy)]
pub struct CollectorIntervals {
    pub roster: Duration,
    pub readings: Duration,
    /// Wait before re-subscribing a dropped feed.
    pub resubscribe: Duration,
}

pub struct Collector {
    handle: ReconcilerHandle,
    roster: Arc<dyn RosterSource>,
    readings: Arc<dyn ReadingStore>,
    anomaly: Arc<AnomalyChannel>,
    devices: Arc<DeviceStateChannel>,
    intervals: CollectorIntervals,
}

impl Collector {
    pub fn new(
        handle: ReconcilerHandle,
        roster: Arc<dyn RosterSource>,
        readings: Arc<dyn ReadingStore>,
        anomaly: Arc<AnomalyChannel>,
        devices: Arc<DeviceStateChannel>,
        intervals: CollectorIntervals,
    ) -> Self {
        Self {
            handle,
            roster,
            readings,
            anomaly,
            devices,
            intervals,
        }
    }

    /// Spawn every collector task. They all stop when `cancel` fires.
    pub fn start(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        // ---
        info!(
            "Starting collectors (roster: {:?}, readings: {:?}, resubscribe: {:?})",
            self.intervals.roster, self.intervals.readings, self.intervals.resubscribe
        );

        let roster = {
            let (source, handle) = (Arc::clone(&self.roster), self.handle.clone());
            poll_loop("roster", self.intervals.roster, cancel.clone(), move || {
                let (source, handle) = (Arc::clone(&source), handle.clone());
                async move { poll_roster(source.as_ref(), &handle).await }
            })
        };

        let readings = {
            let (store, handle) = (Arc::clone(&self.readings), self.handle.clone());
            poll_loop("readings", self.intervals.readings, cancel.clone(), move || {
                let (store, handle) = (Arc::clone(&store), handle.clone());
                async move { poll_latest(store.as_ref(), &handle).await }
            })
        };

        let anomaly = {
            let handle = self.handle.clone();
            pump(
                "anomaly",
                Arc::clone(&self.anomaly),
                self.intervals.resubscribe,
                cancel.clone(),
                move |snapshot| {
                    let handle = handle.clone();
                    async move { handle.anomaly_snapshot(snapshot).await }
                },
            )
        };

        let devices = {
            let handle = self.handle.clone();
            pump(
                "devices",
                Arc::clone(&self.devices),
                self.intervals.resubscribe,
                cancel.clone(),
                move |states| {
                    let handle = handle.clone();
                    async move { handle.device_states(states).await }
                },
            )
        };

        vec![
            tokio::spawn(roster),
            tokio::spawn(readings),
            tokio::spawn(anomaly),
            tokio::spawn(devices),
        ]
    }
}

/// Read the roster for every metric and hand it to the reconciler.
pub async fn poll_roster(source: &dyn RosterSource, handle: &ReconcilerHandle) -> Result<usize> {
    // ---
    let mut descriptors = Vec::new();
    for metric in MetricType::ALL {
        for id in source.list_sensors(metric).await? {
            descriptors.push(SensorDescriptor::from_roster(id, metric));
        }
    }
    let count = descriptors.len();
    handle.roster_discovered(descriptors).await?;
    Ok(count)
}

/// Forward the newest reading of every sensor to the reconciler.
pub async fn poll_latest(store: &dyn ReadingStore, handle: &ReconcilerHandle) -> Result<usize> {
    // ---
    let mut forwarded = 0;
    for metric in MetricType::ALL {
        for reading in store.latest(metric).await? {
            handle
                .reading_update(reading.sensor_id, reading.value, metric)
                .await?;
            forwarded += 1;
        }
    }
    Ok(forwarded)
}

/// Counts consecutive failures so a dead upstream does not flood the log.
#[derive(Debug)]
struct FailureLog {
    task: &'static str,
    consecutive: u32,
}

impl FailureLog {
    fn new(task: &'static str) -> Self {
        Self {
            task,
            consecutive: 0,
        }
    }

    fn success(&mut self) {
        if self.consecutive > 0 {
            info!("{} collector recovered after {} failure(s)", self.task, self.consecutive);
        }
        self.consecutive = 0;
    }

    fn failure(&mut self, e: &Error) {
        self.consecutive += 1;
        if self.consecutive <= 3 {
            warn!("{} collector failed: {} (attempt {})", self.task, e, self.consecutive);
        } else if self.consecutive == 4 {
            error!(
                "{} collector failed {} times in a row, will continue trying silently",
                self.task, self.consecutive
            );
        }
    }
}

async fn poll_loop<F, Fut>(
    task: &'static str,
    every: Duration,
    cancel: CancellationToken,
    mut cycle: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<usize>>,
{
    // ---
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = FailureLog::new(task);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match cycle().await {
            Ok(count) => {
                failures.success();
                debug!("{} poll forwarded {} item(s)", task, count);
            }
            Err(Error::ReconcilerStopped) => break,
            Err(e) => failures.failure(&e),
        }
    }
    debug!("{} poller stopped", task);
}

/// Forward every snapshot a channel delivers. After a dropped subscription
/// the pump waits `resubscribe`, subscribes again, then re-reads the current
/// snapshot so a change made during the gap is not lost.
async fn pump<T, F, Fut>(
    task: &'static str,
    channel: Arc<dyn SnapshotChannel<T>>,
    resubscribe: Duration,
    cancel: CancellationToken,
    forward: F,
) where
    T: Clone + Send + Sync + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    // ---
    let mut failures = FailureLog::new(task);
    let mut first = true;

    loop {
        if !first && !pause(&cancel, resubscribe).await {
            break;
        }
        first = false;

        // Subscribe before reading so nothing slips between the two
        let mut subscription = match channel.subscribe().await {
            Ok(subscription) => subscription,
            Err(e) => {
                failures.failure(&e);
                continue;
            }
        };
        match channel.current_snapshot().await {
            Ok(snapshot) => match forward(snapshot).await {
                Ok(()) => failures.success(),
                Err(Error::ReconcilerStopped) => break,
                Err(e) => failures.failure(&e),
            },
            Err(e) => failures.failure(&e),
        }

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("{} pump stopped", task);
                    return;
                }
                next = subscription.next() => next,
            };
            let Some(snapshot) = next else {
                warn!("{} subscription dropped, re-subscribing in {:?}", task, resubscribe);
                break;
            };
            match forward(snapshot).await {
                Ok(()) => {}
                Err(Error::ReconcilerStopped) => return,
                Err(e) => failures.failure(&e),
            }
        }
    }
    debug!("{} pump stopped", task);
}

/// Sleep unless cancelled first. Returns false on cancellation.
async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(delay) => true,
    }
}
