use crate::ride::RideStatus;
use crate::types::TimeStamp;
use chrono::Utc;
use std::sync::Mutex;

/// Published after a status change has been persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RideStatusChanged {
    pub ride_id: String,
    pub from: RideStatus,
    pub to: RideStatus,
    pub at: TimeStamp<Utc>,
    pub version: u64,
}

/// Notification and chat layers plug in here; delivery is their concern.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &RideStatusChanged);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: &RideStatusChanged) {
        tracing::info!(
            ride_id = %event.ride_id,
            from = %event.from,
            to = %event.to,
            version = event.version,
            "ride status changed"
        );
    }
}

/// Keeps every event in memory, in publication order.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<RideStatusChanged>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn events(&self) -> Vec<RideStatusChanged> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
    pub fn for_ride(&self, ride_id: &str) -> Vec<RideStatusChanged> {
        self.events()
            .into_iter()
            .filter(|e| e.ride_id == ride_id)
            .collect()
    }
}

impl EventSink for EventRecorder {
    fn publish(&self, event: &RideStatusChanged) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
