//! Single-writer reconciler task.
//!
//! The [`Reconciler`] owns the [`SensorRegistry`] and the [`Deduplicator`].
//! Pollers, signal pumps and HTTP handlers never touch that state directly;
//! they hold a cloneable [`ReconcilerHandle`] and send [`Command`]s over a
//! channel, so updates for any sensor are applied one at a time in arrival
//! order. Handling a command is synchronous and never waits on I/O.

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::{
    AnomalySnapshot, DeviceState, DeviceStateSnapshot, MetricType, Position, SensorDescriptor,
    SensorRecord,
};
use crate::notify::{Deduplicator, NotificationEvent, SignalKey, SignalState};
use crate::registry::SensorRegistry;

// ---

/// Commands queued before senders start waiting.
const COMMAND_BUFFER: usize = 256;

/// Messages accepted by the reconciler task.
#[derive(Debug)]
pub enum Command {
    RosterDiscovered(Vec<SensorDescriptor>),
    ReadingUpdate {
        sensor_id: String,
        value: f64,
        metric: MetricType,
    },
    AnomalySnapshot(AnomalySnapshot),
    DeviceStates(DeviceStateSnapshot),
    SetPosition {
        sensor_id: String,
        position: Position,
        reply: oneshot::Sender<bool>,
    },
    ResetPosition {
        sensor_id: String,
        reply: oneshot::Sender<bool>,
    },
    Snapshot(oneshot::Sender<Vec<SensorRecord>>),
    PendingNotifications(oneshot::Sender<Vec<NotificationEvent>>),
    ClearNotifications(oneshot::Sender<usize>),
}

pub struct Reconciler {
    registry: SensorRegistry,
    dedup: Deduplicator,
}

impl Reconciler {
    /// Build a reconciler whose anomaly baseline is `initial`, the snapshot
    /// read from the channel at startup. Tracked metrics missing from it
    /// count as not alerting, and none of them notify.
    pub fn new(
        mut registry: SensorRegistry,
        mut dedup: Deduplicator,
        initial: &AnomalySnapshot,
    ) -> Self {
        // ---
        registry.on_anomaly_snapshot(initial);
        for metric in registry.bindings().metrics() {
            let alerting = initial.get(metric).unwrap_or(false);
            dedup.record_baseline(
                SignalKey::Anomaly(metric.to_string()),
                SignalState::Anomaly(alerting),
            );
        }
        Self { registry, dedup }
    }

    /// Apply one command to the owned state.
    pub fn handle(&mut self, command: Command, now: DateTime<Utc>) {
        // ---
        match command {
            Command::RosterDiscovered(descriptors) => {
                let created = self.registry.on_roster_discovered(&descriptors);
                if created > 0 {
                    info!("Discovered {} new sensor(s)", created);
                }
            }
            Command::ReadingUpdate {
                sensor_id,
                value,
                metric,
            } => {
                self.registry.on_reading_update(&sensor_id, value, metric);
            }
            Command::AnomalySnapshot(snapshot) => self.apply_anomaly(&snapshot, now),
            Command::DeviceStates(states) => self.apply_device_states(&states, now),
            Command::SetPosition {
                sensor_id,
                position,
                reply,
            } => {
                let _ = reply.send(self.registry.set_position(&sensor_id, position));
            }
            Command::ResetPosition { sensor_id, reply } => {
                let _ = reply.send(self.registry.reset_position(&sensor_id));
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.registry.snapshot_all());
            }
            Command::PendingNotifications(reply) => {
                let _ = reply.send(self.dedup.pending());
            }
            Command::ClearNotifications(reply) => {
                let cleared = self.dedup.clear();
                debug!("Cleared {} pending notification(s)", cleared);
                let _ = reply.send(cleared);
            }
        }
    }

    fn apply_anomaly(&mut self, snapshot: &AnomalySnapshot, now: DateTime<Utc>) {
        // ---
        for sensor_id in self.registry.on_anomaly_snapshot(snapshot) {
            debug!("Sensor {} status re-derived from anomaly snapshot", sensor_id);
        }

        for (metric, alerting) in snapshot.iter() {
            if !self.registry.bindings().is_tracked(metric) {
                debug!("Ignoring signal: {}", Error::UnknownSignal(metric.to_string()));
                continue;
            }
            let key = SignalKey::Anomaly(metric.to_string());
            if let Some(event) = self.dedup.observe(key, SignalState::Anomaly(alerting), now) {
                info!("Notification {}: {}", event.id, event.message);
            }
        }
    }

    fn apply_device_states(&mut self, states: &DeviceStateSnapshot, now: DateTime<Utc>) {
        // ---
        for (device, raw) in states {
            let state = match raw.parse::<DeviceState>() {
                Ok(state) => state,
                Err(e) => {
                    debug!("Ignoring signal from {}: {}", device, e);
                    continue;
                }
            };
            let key = SignalKey::Device(device.clone());
            if let Some(event) = self.dedup.observe(key, SignalState::Device(state), now) {
                info!("Notification {}: {}", event.id, event.message);
            }
        }
    }

    /// Move the reconciler onto its own task. The task ends when `cancel`
    /// fires or every handle has been dropped.
    pub fn spawn(self, cancel: CancellationToken) -> (ReconcilerHandle, JoinHandle<()>) {
        // ---
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = tokio::spawn(self.run(rx, cancel));
        (ReconcilerHandle { tx }, handle)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>, cancel: CancellationToken) {
        // ---
        info!(
            "Reconciler started ({} tracked binding(s))",
            self.registry.bindings().len()
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => self.handle(command, Utc::now()),
                    None => break,
                },
            }
        }
        info!("Reconciler stopped");
    }
}

/// Cloneable front door to the reconciler task.
#[derive(Debug, Clone)]
pub struct ReconcilerHandle {
    tx: mpsc::Sender<Command>,
}

impl ReconcilerHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| Error::ReconcilerStopped)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply)).await?;
        rx.await.map_err(|_| Error::ReconcilerStopped)
    }

    pub async fn roster_discovered(&self, descriptors: Vec<SensorDescriptor>) -> Result<()> {
        self.send(Command::RosterDiscovered(descriptors)).await
    }

    pub async fn reading_update(
        &self,
        sensor_id: impl Into<String>,
        value: f64,
        metric: MetricType,
    ) -> Result<()> {
        self.send(Command::ReadingUpdate {
            sensor_id: sensor_id.into(),
            value,
            metric,
        })
        .await
    }

    pub async fn anomaly_snapshot(&self, snapshot: AnomalySnapshot) -> Result<()> {
        self.send(Command::AnomalySnapshot(snapshot)).await
    }

    pub async fn device_states(&self, states: DeviceStateSnapshot) -> Result<()> {
        self.send(Command::DeviceStates(states)).await
    }

    /// Returns whether the sensor is already known.
    pub async fn set_position(&self, sensor_id: impl Into<String>, position: Position) -> Result<bool> {
        let sensor_id = sensor_id.into();
        self.request(|reply| Command::SetPosition {
            sensor_id,
            position,
            reply,
        })
        .await
    }

    /// Returns whether the sensor is already known.
    pub async fn reset_position(&self, sensor_id: impl Into<String>) -> Result<bool> {
        let sensor_id = sensor_id.into();
        self.request(|reply| Command::ResetPosition { sensor_id, reply })
            .await
    }

    pub async fn snapshot_all(&self) -> Result<Vec<SensorRecord>> {
        self.request(Command::Snapshot).await
    }

    pub async fn pending_notifications(&self) -> Result<Vec<NotificationEvent>> {
        self.request(Command::PendingNotifications).await
    }

    pub async fn clear_notifications(&self) -> Result<usize> {
        self.request(Command::ClearNotifications).await
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::SensorStatus;
    use crate::registry::AnomalyBindings;
    use std::collections::HashMap;

    fn reconciler(initial: &AnomalySnapshot) -> Reconciler {
        let bindings =
            AnomalyBindings::new([("soilmoist1", "soil_moisture"), ("temp1", "temperature")]);
        Reconciler::new(
            SensorRegistry::new(bindings, None, HashMap::new()),
            Deduplicator::new(),
            initial,
        )
    }

    fn flags(pairs: &[(&str, bool)]) -> AnomalySnapshot {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[tokio::test]
    async fn test_roster_then_anomaly_scenario() {
        // ---
        let cancel = CancellationToken::new();
        let (handle, task) = reconciler(&AnomalySnapshot::new()).spawn(cancel.clone());

        handle
            .roster_discovered(vec![SensorDescriptor::from_roster(
                "soilmoist1",
                MetricType::Humidity,
            )])
            .await
            .unwrap();
        let before = handle.snapshot_all().await.unwrap();
        assert_eq!(before[0].status, SensorStatus::Normal);

        handle
            .anomaly_snapshot(flags(&[("soil_moisture", true)]))
            .await
            .unwrap();
        let after = handle.snapshot_all().await.unwrap();
        assert_eq!(after[0].status, SensorStatus::Alert);

        let pending = handle.pending_notifications().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].subject, "soil_moisture");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_startup_alert_is_baseline() {
        // ---
        let cancel = CancellationToken::new();
        let (handle, task) =
            reconciler(&flags(&[("soil_moisture", true)])).spawn(cancel.clone());

        // Created after the anomaly was already active: must not start stale
        handle
            .reading_update("soilmoist1", 12.0, MetricType::Humidity)
            .await
            .unwrap();
        let records = handle.snapshot_all().await.unwrap();
        assert_eq!(records[0].status, SensorStatus::Alert);

        // Re-delivery of the same state is not a transition
        handle
            .anomaly_snapshot(flags(&[("soil_moisture", true)]))
            .await
            .unwrap();
        assert!(handle.pending_notifications().await.unwrap().is_empty());

        cancel.cancel();
        task.await.unwrap();
    }

    #[test]
    fn test_unknown_flags_are_ignored() {
        // ---
        let mut rec = reconciler(&AnomalySnapshot::new());
        rec.handle(
            Command::AnomalySnapshot(flags(&[("light_level", true)])),
            Utc::now(),
        );
        assert!(rec.dedup.pending().is_empty());
        assert!(rec
            .dedup
            .previous(&SignalKey::Anomaly("light_level".to_string()))
            .is_none());
    }

    #[test]
    fn test_device_states_skip_unrecognized_values() {
        // ---
        let mut rec = reconciler(&AnomalySnapshot::new());
        let states: DeviceStateSnapshot = [
            ("relay1".to_string(), "on".to_string()),
            ("relay2".to_string(), "dimmed".to_string()),
        ]
        .into();
        rec.handle(Command::DeviceStates(states.clone()), Utc::now());
        rec.handle(Command::DeviceStates(states), Utc::now());

        let pending = rec.dedup.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].subject, "relay1");
    }

    #[tokio::test]
    async fn test_clear_notifications() {
        // ---
        let cancel = CancellationToken::new();
        let (handle, task) = reconciler(&AnomalySnapshot::new()).spawn(cancel.clone());

        handle
            .anomaly_snapshot(flags(&[("temperature", true)]))
            .await
            .unwrap();
        assert_eq!(handle.clear_notifications().await.unwrap(), 1);
        assert!(handle.pending_notifications().await.unwrap().is_empty());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_errors_after_stop() {
        // ---
        let cancel = CancellationToken::new();
        let (handle, task) = reconciler(&AnomalySnapshot::new()).spawn(cancel.clone());
        cancel.cancel();
        task.await.unwrap();

        let err = handle.snapshot_all().await.unwrap_err();
        assert!(matches!(err, Error::ReconcilerStopped));
    }
}
