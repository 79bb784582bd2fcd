//! Shared TTL cache for source readings.
//!
//! One handle is created per adapter type and cloned into every instance of
//! that adapter, so two call sites never refetch the same payload inside the
//! TTL window. A failed refresh never touches the stored entry.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::domain::Reading;

#[derive(Debug, Clone)]
struct CacheEntry {
    reading: Reading,
    fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct TtlCache {
    inner: Arc<Mutex<Option<CacheEntry>>>,
}

impl TtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The memoized reading if it was fetched less than `ttl` before `now`.
    pub fn fresh_at(&self, ttl: Duration, now: DateTime<Utc>) -> Option<Reading> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .filter(|e| now.signed_duration_since(e.fetched_at) < ttl)
            .map(|e| e.reading.clone())
    }

    /// Last good reading regardless of age.
    pub fn latest(&self) -> Option<(Reading, DateTime<Utc>)> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(|e| (e.reading.clone(), e.fetched_at))
    }

    pub fn store(&self, reading: Reading, now: DateTime<Utc>) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(CacheEntry {
            reading,
            fetched_at: now,
        });
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(|e| e.fetched_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Instrument;
    use chrono::TimeZone;

    #[test]
    fn entry_expires_after_ttl() {
        let cache = TtlCache::new();
        let t0 = Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap();
        let r = Reading::new("brsapi", t0).with_value(Instrument::UsdToman, 108_400.0);
        cache.store(r.clone(), t0);

        let ttl = Duration::minutes(15);
        assert_eq!(cache.fresh_at(ttl, t0 + Duration::minutes(14)), Some(r.clone()));
        assert_eq!(cache.fresh_at(ttl, t0 + Duration::minutes(15)), None);
        assert_eq!(cache.latest().map(|(r, _)| r), Some(r));
    }

    #[test]
    fn clones_share_one_entry() {
        let a = TtlCache::new();
        let b = a.clone();
        let t0 = Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap();
        a.store(Reading::new("x", t0).with_value(Instrument::EurToman, 1.0), t0);
        assert_eq!(b.fetched_at(), Some(t0));
    }
}
