use crate::types::TimeStamp;
use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Source of "now" for deadlines; injected so expiry can be tested.
pub trait Clock: Send + Sync {
    fn now(&self) -> TimeStamp<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimeStamp<Utc> {
        TimeStamp::new()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: TimeStamp<Utc>) -> Self {
        Self {
            now: Mutex::new(start.to_datetime_utc()),
        }
    }
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
    pub fn set(&self, to: TimeStamp<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = to.to_datetime_utc();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimeStamp<Utc> {
        let now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        TimeStamp::from(*now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_on_demand() {
        let start = TimeStamp::new_with(2025, 2, 1, 8, 0, 0);
        let clock = ManualClock::new(start.clone());
        assert_eq!(clock.now(), start);

        clock.advance(Duration::minutes(3));
        assert_eq!(clock.now().since(&start), Duration::minutes(3));
    }
}
