/// Clock abstraction and timestamp formatting
///
/// All time-dependent logic (typing TTL, date separators) reads the time
/// through [`Clock`] so tests can move time by hand.
use crate::error::{Result, SyncError};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::{Arc, Mutex};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for deterministic tests and replays
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Calendar day a timestamp falls on
pub fn date_bucket(ts: DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}

/// "14:05"
pub fn format_time_of_day(ts: DateTime<Utc>) -> String {
    ts.format("%H:%M").to_string()
}

/// Date separator label, e.g. "Fri, Mar 1"
pub fn format_day_label(ts: DateTime<Utc>) -> String {
    ts.format("%a, %b %-d").to_string()
}

/// "2024-03-01 14:05"
pub fn format_full(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

/// A date separator goes before the first message and on every day change.
pub fn starts_new_day(previous: Option<DateTime<Utc>>, current: DateTime<Utc>) -> bool {
    match previous {
        Some(prev) => date_bucket(prev) != date_bucket(current),
        None => true,
    }
}

/// Server timestamps are RFC 3339
pub fn parse_server_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| SyncError::Serialization(serde::de::Error::custom(format!(
            "bad timestamp {:?}: {}",
            raw, e
        ))))
}
