//! # Stats
//! Post/error counters with a rolling 24h event window.
//!
//! Persisted best-effort to JSON after every change. A missing or unreadable
//! file starts a fresh tracker.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::persistence::{read_json_or_quarantine, write_json_atomic};

const MAX_ERROR_LEN: usize = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum StatEvent {
    Post {
        at: DateTime<Utc>,
        providers: Vec<String>,
        manual: bool,
    },
    Error {
        at: DateTime<Utc>,
        message: String,
    },
}

impl StatEvent {
    fn at(&self) -> DateTime<Utc> {
        match self {
            StatEvent::Post { at, .. } | StatEvent::Error { at, .. } => *at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StatsData {
    start_time: DateTime<Utc>,
    #[serde(default)]
    total_posts: u64,
    #[serde(default)]
    total_manual_posts: u64,
    #[serde(default)]
    total_errors: u64,
    #[serde(default)]
    events: Vec<StatEvent>,
}

impl StatsData {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            start_time: now,
            total_posts: 0,
            total_manual_posts: 0,
            total_errors: 0,
            events: Vec::new(),
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(24);
        self.events.retain(|e| e.at() > cutoff);
    }
}

/// Last-24h view plus lifetime totals, served on `/stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSummary {
    pub since: Option<DateTime<Utc>>,
    pub posts_24h: u64,
    pub manual_posts_24h: u64,
    pub errors_24h: u64,
    pub provider_usage_24h: BTreeMap<String, u64>,
    pub last_post: Option<DateTime<Utc>>,
    pub last_error: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
    pub total_posts: u64,
    pub total_manual_posts: u64,
    pub total_errors: u64,
}

pub struct StatsTracker {
    path: Option<PathBuf>,
    data: Mutex<StatsData>,
}

impl StatsTracker {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        Self::load_at(path, Utc::now())
    }

    pub fn load_at(path: impl Into<PathBuf>, now: DateTime<Utc>) -> Self {
        let path = path.into();
        let data = match read_json_or_quarantine::<StatsData>(&path) {
            Ok(Some(d)) => {
                tracing::debug!(path = %path.display(), "loaded stats");
                d
            }
            Ok(None) => {
                tracing::info!(path = %path.display(), "initialized new stats tracker");
                StatsData::fresh(now)
            }
            Err(_) => StatsData::fresh(now),
        };
        Self {
            path: Some(path),
            data: Mutex::new(data),
        }
    }

    /// Not persisted anywhere. Used by tests and dry runs.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(StatsData::fresh(Utc::now())),
        }
    }

    fn save(&self, data: &StatsData) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = write_json_atomic(path, data) {
            tracing::error!(error = %e, "failed to save stats");
        }
    }

    pub fn record_post(&self, providers: &[String], manual: bool) {
        self.record_post_at(providers, manual, Utc::now());
    }

    pub fn record_post_at(&self, providers: &[String], manual: bool, now: DateTime<Utc>) {
        let mut d = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        d.total_posts += 1;
        if manual {
            d.total_manual_posts += 1;
        }
        d.events.push(StatEvent::Post {
            at: now,
            providers: providers.to_vec(),
            manual,
        });
        d.prune(now);
        self.save(&d);
    }

    pub fn record_error(&self, message: &str) {
        self.record_error_at(message, Utc::now());
    }

    pub fn record_error_at(&self, message: &str, now: DateTime<Utc>) {
        let mut d = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        d.total_errors += 1;
        d.events.push(StatEvent::Error {
            at: now,
            message: message.chars().take(MAX_ERROR_LEN).collect(),
        });
        d.prune(now);
        self.save(&d);
    }

    pub fn summary(&self) -> StatsSummary {
        self.summary_at(Utc::now())
    }

    pub fn summary_at(&self, now: DateTime<Utc>) -> StatsSummary {
        let d = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let cutoff = now - Duration::hours(24);
        let mut s = StatsSummary {
            since: Some(d.start_time),
            total_posts: d.total_posts,
            total_manual_posts: d.total_manual_posts,
            total_errors: d.total_errors,
            ..StatsSummary::default()
        };

        for e in d.events.iter().filter(|e| e.at() > cutoff && e.at() <= now) {
            match e {
                StatEvent::Post { at, providers, manual } => {
                    s.posts_24h += 1;
                    if *manual {
                        s.manual_posts_24h += 1;
                    }
                    for p in providers {
                        *s.provider_usage_24h.entry(p.clone()).or_default() += 1;
                    }
                    s.last_post = s.last_post.max(Some(*at));
                }
                StatEvent::Error { at, message } => {
                    s.errors_24h += 1;
                    if s.last_error.map_or(true, |prev| *at >= prev) {
                        s.last_error = Some(*at);
                        s.last_error_message = Some(message.clone());
                    }
                }
            }
        }
        s
    }
}
