//! Edge-triggered notifications.
//!
//! [`evaluate`] is the pure transition rule. [`Deduplicator`] owns the
//! per-signal "previous state" tracker and the pending list, and is driven
//! by the reconciler task with every incoming anomaly snapshot and
//! device-state update.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::DeviceState;

// ---

/// Pending notifications kept before the oldest are dropped.
pub const MAX_PENDING: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// A tracked metric went anomalous.
    Warning,
    /// A relay switch suggestion.
    Info,
}

/// One emitted notification. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    // ---
    pub id: Uuid,
    pub subject: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Identity of a tracked signal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SignalKey {
    /// An anomaly flag, by metric name.
    Anomaly(String),
    /// A relay suggestion, by device id.
    Device(String),
}

impl SignalKey {
    pub fn subject(&self) -> &str {
        match self {
            SignalKey::Anomaly(s) | SignalKey::Device(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    Anomaly(bool),
    Device(DeviceState),
}

/// Decide whether moving from `previous` to `current` emits a notification.
///
/// - Anomaly flags notify only on a change into the alerting state. A first
///   observation is a silent baseline.
/// - Device states notify on every change. A device seen for the first time
///   gets a notification backdated 5 to 10 minutes so the list reads as
///   continuous history.
pub fn evaluate(
    subject: &str,
    previous: Option<SignalState>,
    current: SignalState,
    now: DateTime<Utc>,
) -> Option<NotificationEvent> {
    // ---
    match (previous, current) {
        (Some(SignalState::Anomaly(was)), SignalState::Anomaly(true)) if !was => Some(
            NotificationEvent {
                id: Uuid::new_v4(),
                subject: subject.to_string(),
                severity: Severity::Warning,
                timestamp: now,
                message: format!("Anomaly detected in {subject} readings"),
            },
        ),
        (None, SignalState::Device(state)) => {
            let minutes = rand::rng().random_range(5..=10);
            Some(device_event(subject, state, now - Duration::minutes(minutes)))
        }
        (Some(SignalState::Device(was)), SignalState::Device(state)) if was != state => {
            Some(device_event(subject, state, now))
        }
        _ => None,
    }
}

fn device_event(subject: &str, state: DeviceState, timestamp: DateTime<Utc>) -> NotificationEvent {
    NotificationEvent {
        id: Uuid::new_v4(),
        subject: subject.to_string(),
        severity: Severity::Info,
        timestamp,
        message: format!("Suggested: switch {subject} {}", state.as_str()),
    }
}

#[derive(Debug)]
pub struct Deduplicator {
    previous: HashMap<SignalKey, SignalState>,
    pending: VecDeque<NotificationEvent>,
    capacity: usize,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::with_capacity(MAX_PENDING)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            previous: HashMap::new(),
            pending: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record a state without evaluating it.
    pub fn record_baseline(&mut self, key: SignalKey, state: SignalState) {
        self.previous.insert(key, state);
    }

    /// Feed the latest state of one signal. Returns the notification it
    /// produced, which is also prepended to the pending list.
    pub fn observe(
        &mut self,
        key: SignalKey,
        current: SignalState,
        now: DateTime<Utc>,
    ) -> Option<NotificationEvent> {
        // ---
        let previous = self.previous.insert(key.clone(), current);
        let event = evaluate(key.subject(), previous, current, now)?;

        self.pending.push_front(event.clone());
        self.pending.truncate(self.capacity);
        Some(event)
    }

    pub fn previous(&self, key: &SignalKey) -> Option<SignalState> {
        self.previous.get(key).copied()
    }

    /// Pending notifications, newest first.
    pub fn pending(&self) -> Vec<NotificationEvent> {
        self.pending.iter().cloned().collect()
    }

    /// Empty the pending list. Tracked states are kept. Returns how many
    /// notifications were cleared.
    pub fn clear(&mut self) -> usize {
        let cleared = self.pending.len();
        self.pending.clear();
        cleared
    }
}
