//! # Baseline manager
//! Owns the single "last announced" snapshot.
//!
//! The in-memory value is authoritative. Persistence is write-through and
//! best-effort: a failed save is logged and the new baseline is kept anyway.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use metrics::gauge;

use crate::domain::{Baseline, Instrument};
use crate::persistence::{LoadOutcome, RawState, StateStore};

pub struct BaselineManager {
    current: RwLock<Option<Baseline>>,
    store: Arc<dyn StateStore>,
}

fn publish_gauges(b: &Baseline) {
    for (i, v) in &b.values {
        gauge!("xrate_baseline_value", "instrument" => i.key()).set(*v);
    }
    gauge!("xrate_baseline_ts").set(b.timestamp.timestamp() as f64);
}

impl BaselineManager {
    pub fn load(store: Arc<dyn StateStore>) -> Self {
        Self::load_at(store, Utc::now())
    }

    /// Never fails: a missing file is a cold start, a corrupt one has already
    /// been quarantined by the store.
    pub fn load_at(store: Arc<dyn StateStore>, now: DateTime<Utc>) -> Self {
        let current = match store.load() {
            LoadOutcome::Absent => {
                tracing::info!("no persisted baseline, cold start");
                None
            }
            LoadOutcome::Loaded(raw) => {
                let b = raw.into_baseline(now);
                if b.values.is_empty() {
                    tracing::warn!("persisted baseline has no usable values, cold start");
                    None
                } else {
                    tracing::info!(ts = %b.timestamp, instruments = b.values.len(), "loaded baseline");
                    publish_gauges(&b);
                    Some(b)
                }
            }
            LoadOutcome::Corrupt { quarantined_to } => {
                tracing::error!(quarantined_to = ?quarantined_to, "persisted baseline corrupt, cold start");
                None
            }
        };
        Self {
            current: RwLock::new(current),
            store,
        }
    }

    pub fn get_current(&self) -> Option<Baseline> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn has_baseline(&self) -> bool {
        self.current.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Merge `values` into the current baseline (absent instruments keep
    /// their old value), swap it in, then persist.
    pub fn update(
        &self,
        values: &BTreeMap<Instrument, f64>,
        sources: Vec<String>,
        timestamp: DateTime<Utc>,
    ) -> Baseline {
        let next = {
            let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
            let next = Baseline::merged(guard.as_ref(), values, sources, timestamp);
            *guard = Some(next.clone());
            next
        };

        match self.store.save(&RawState::from_baseline(&next)) {
            Ok(()) => tracing::info!(ts = %next.timestamp, "baseline updated and persisted"),
            Err(e) => tracing::error!(error = %e, "failed to persist baseline, keeping in-memory value"),
        }
        publish_gauges(&next);
        next
    }

    pub fn get_elapsed_seconds(&self) -> i64 {
        self.get_elapsed_seconds_at(Utc::now())
    }

    /// Seconds since the baseline timestamp; 0 without a baseline.
    pub fn get_elapsed_seconds_at(&self, now: DateTime<Utc>) -> i64 {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|b| now.signed_duration_since(b.timestamp).num_seconds().max(0))
            .unwrap_or(0)
    }
}
