//! Per-source "next eligible fetch" gate.
//!
//! The scheduler wakes at the fastest source's cadence; this gate throttles
//! every slower source back to its own TTL regardless of how often the loop
//! runs. State is in-memory only, so a restart queries everything once.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Default)]
pub struct EligibilityGate {
    next_eligible: BTreeMap<String, DateTime<Utc>>,
}

impl EligibilityGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_fetch(&mut self, source: &str, cache_ttl_minutes: u32) -> bool {
        self.should_fetch_at(source, cache_ttl_minutes, Utc::now())
    }

    /// A source passes when it was never seen or `now` has reached its
    /// recorded time; every pass moves that time `ttl` minutes past `now`.
    pub fn should_fetch_at(&mut self, source: &str, cache_ttl_minutes: u32, now: DateTime<Utc>) -> bool {
        let next = self.next_eligible.get(source).copied().unwrap_or(now);

        if now >= next {
            self.next_eligible.insert(
                source.to_string(),
                now + Duration::minutes(i64::from(cache_ttl_minutes)),
            );
            true
        } else {
            tracing::debug!(source, %next, ttl_min = cache_ttl_minutes, "source not yet eligible");
            false
        }
    }

    pub fn next_eligible(&self, source: &str) -> Option<DateTime<Utc>> {
        self.next_eligible.get(source).copied()
    }

    /// Snapshot for the status endpoint.
    pub fn snapshot(&self) -> BTreeMap<String, DateTime<Utc>> {
        self.next_eligible.clone()
    }
}
