//! Latest-value publish/subscribe channels for pushed signals.
//!
//! A [`SnapshotChannel`] hands out the full current snapshot on demand and a
//! [`Subscription`] that wakes whenever the snapshot changes. Rapid changes
//! may coalesce into a single wake-up carrying only the newest snapshot, so
//! consumers must never count deliveries.
//!
//! [`LocalFeed`] is the in-process implementation backed by
//! [`tokio::sync::watch`]; the HTTP layer publishes into it.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Result;
use crate::models::{AnomalySnapshot, DeviceStateSnapshot};

// ---

/// A source of full snapshots with change notification.
#[async_trait]
pub trait SnapshotChannel<T>: Send + Sync {
    /// Read the latest snapshot synchronously with respect to the channel.
    async fn current_snapshot(&self) -> Result<T>;

    /// Start receiving change notifications. Values published before this
    /// call are not replayed; pair it with [`current_snapshot`](Self::current_snapshot).
    async fn subscribe(&self) -> Result<Subscription<T>>;
}

/// The anomaly flag channel consumed by the reconciler.
pub type AnomalyChannel = dyn SnapshotChannel<AnomalySnapshot>;

/// The relay suggestion channel consumed by the notification layer.
pub type DeviceStateChannel = dyn SnapshotChannel<DeviceStateSnapshot>;

/// Receiving half of a channel subscription.
pub struct Subscription<T> {
    rx: watch::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    /// Wait for the next change. Returns `None` once the subscription has
    /// been disconnected; the caller should re-subscribe.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        Some(T::clone(&self.rx.borrow_and_update()))
    }
}

/// In-process snapshot channel.
#[derive(Clone)]
pub struct LocalFeed<T> {
    tx: Arc<Mutex<watch::Sender<T>>>,
}

impl<T> LocalFeed<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (tx, _) = watch::channel(T::default());
        Self {
            tx: Arc::new(Mutex::new(tx)),
        }
    }

    fn sender(&self) -> MutexGuard<'_, watch::Sender<T>> {
        // A poisoned lock still guards a valid sender
        self.tx.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current(&self) -> T {
        T::clone(&self.sender().borrow())
    }

    /// Apply `modify` and notify subscribers only if it reports a change.
    pub fn publish_with(&self, modify: impl FnOnce(&mut T) -> bool) -> bool {
        self.sender().send_if_modified(modify)
    }

    /// Drop every live subscription while keeping the current value, as a
    /// transport reconnect would.
    pub fn reset_subscribers(&self) {
        let mut sender = self.sender();
        let current = T::clone(&sender.borrow());
        let (tx, _) = watch::channel(current);
        *sender = tx;
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender().receiver_count()
    }
}

impl<T> Default for LocalFeed<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFeed<AnomalySnapshot> {
    /// Merge a partial update into the snapshot. Returns whether any flag changed.
    pub fn publish(&self, update: &AnomalySnapshot) -> bool {
        self.publish_with(|snapshot| {
            let changed = update.iter().any(|(metric, value)| snapshot.get(metric) != Some(value));
            if changed {
                snapshot.merge(update);
            }
            changed
        })
    }
}

impl LocalFeed<DeviceStateSnapshot> {
    /// Merge device states into the snapshot. Returns whether any state changed.
    pub fn publish(&self, update: &DeviceStateSnapshot) -> bool {
        self.publish_with(|snapshot| {
            let mut changed = false;
            for (device, state) in update {
                if snapshot.get(device) != Some(state) {
                    snapshot.insert(device.clone(), state.clone());
                    changed = true;
                }
            }
            changed
        })
    }
}

#[async_trait]
impl<T> SnapshotChannel<T> for LocalFeed<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    async fn current_snapshot(&self) -> Result<T> {
        Ok(self.current())
    }

    async fn subscribe(&self) -> Result<Subscription<T>> {
        Ok(Subscription {
            rx: self.sender().subscribe(),
        })
    }
}
