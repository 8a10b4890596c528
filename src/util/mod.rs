//! Utilities. OBVIOUSLY.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_derive::{Deserialize, Serialize};
use std::ops::Deref;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod ser;

// A panicked writer can't leave a tree half-written (inserts land as one
// batch), so a poisoned lock is still safe to use.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(rwlock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rwlock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(rwlock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rwlock.write().unwrap_or_else(PoisonError::into_inner)
}

/// A library-local representation of a time.
///
/// Wrapping `DateTime<Utc>` keeps the serialization format in one place and
/// lets us do the handful of unix-seconds conversions the packet header needs
/// without sprinkling chrono calls everywhere. You can always get at the
/// underlying type via deref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a new Timestamp from the current date/time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Build a timestamp from unix seconds. Out-of-range values clamp to the
    /// unix epoch.
    pub fn from_unix(secs: i64) -> Self {
        Self(Utc.timestamp_opt(secs, 0).single().unwrap_or_default())
    }

    /// Seconds since the unix epoch.
    pub fn unix(&self) -> i64 {
        self.0.timestamp()
    }

    /// Return this timestamp moved forward by `secs` seconds.
    pub fn add_secs(&self, secs: u64) -> Self {
        // chrono panics past i64::MAX millis
        let secs = i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1000);
        Self(self.0.checked_add_signed(Duration::seconds(secs)).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
}

impl Deref for Timestamp {
    type Target = DateTime<Utc>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(date: DateTime<Utc>) -> Self {
        Self(date)
    }
}

impl FromStr for Timestamp {
    type Err = chrono::format::ParseError;
    fn from_str(s: &str) -> std::result::Result<Timestamp, Self::Err> {
        let datetime: DateTime<Utc> = s.parse()?;
        Ok(Timestamp(datetime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_unix_roundtrip() {
        let ts = Timestamp::from_unix(1567158430);
        assert_eq!(ts.unix(), 1567158430);
        assert_eq!(ts.add_secs(600).unix(), 1567159030);
        let parsed: Timestamp = "2019-08-30T09:47:10Z".parse().unwrap();
        assert_eq!(parsed, ts);
    }

    #[test]
    fn timestamp_add_saturates() {
        let ts = Timestamp::now();
        assert!(ts.add_secs(u64::MAX) > ts);
    }
}
