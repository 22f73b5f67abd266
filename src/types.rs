//! Timestamp newtype shared by every persisted record
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    /// Builds a timestamp from calendar fields.
    ///
    /// # Panics
    /// Panics when the fields do not name a valid UTC instant.
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .expect("calendar fields must name a single UTC instant")
            .into()
    }
    /// Location fixes arrive as epoch milliseconds
    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(millis).map(TimeStamp)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn timestamp_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }
    pub fn plus(&self, duration: Duration) -> Self {
        Self(self.0 + duration)
    }
    /// Signed time elapsed from `earlier` to `self`.
    pub fn since(&self, earlier: &TimeStamp<Utc>) -> Duration {
        self.0 - earlier.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

// `Utc` itself has no ordering, so the derive cannot be used here.
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for TimeStamp<Utc> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// Stored as signed nanoseconds since the epoch, which covers 1677 to 2262.
impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        let Some(nanos) = self.0.timestamp_nanos_opt() else {
            return Err(minicbor::encode::Error::message(format!(
                "{} is outside the nanosecond range",
                self.0.to_rfc3339()
            )));
        };
        e.i64(nanos)?;
        Ok(())
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        d.i64().map(|nanos| TimeStamp(DateTime::from_timestamp_nanos(nanos)))
    }
}
