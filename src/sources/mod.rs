// src/sources/mod.rs
pub mod cache;
pub mod crawlers;
pub mod http;
pub mod providers;
pub mod registry;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;

use crate::domain::Reading;
use crate::error::SourceError;

pub use cache::TtlCache;
pub use registry::build_resolvers;

/// One external rate source: a scraper or a JSON API client.
#[async_trait]
pub trait RateSource: Send + Sync {
    fn name(&self) -> &str;

    /// Always hits the network; caching lives in [`CachedSource`].
    async fn fetch_fresh(&self) -> Result<Reading, SourceError>;
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "xrate_source_fetch_total",
            "Source lookups by outcome (cached, fresh, stale, error)."
        );
        describe_histogram!("xrate_source_fetch_ms", "Network fetch + parse time in milliseconds.");
    });
}

/// Where a reading handed out by [`CachedSource`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Served from cache inside the TTL.
    Cached,
    /// Fetched from the network just now.
    Fresh,
    /// The refresh failed; this is the last good reading, older than the TTL.
    Stale { fetched_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub reading: Reading,
    pub freshness: Freshness,
}

/// A [`RateSource`] behind a shared TTL cache.
///
/// `id` is the name the gate and attribution see. Two `CachedSource`s may wrap
/// the same adapter and cache under different ids (BRS serves two chains).
pub struct CachedSource {
    id: String,
    ttl_minutes: u32,
    inner: Arc<dyn RateSource>,
    cache: TtlCache,
}

impl CachedSource {
    pub fn new(inner: Arc<dyn RateSource>, cache: TtlCache, ttl_minutes: u32) -> Self {
        Self {
            id: inner.name().to_string(),
            ttl_minutes,
            inner,
            cache,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ttl_minutes(&self) -> u32 {
        self.ttl_minutes
    }

    pub async fn fetch(&self) -> Result<Fetched, SourceError> {
        self.fetch_at(Utc::now()).await
    }

    /// Memoized reading inside the TTL, otherwise a refresh. A failed refresh
    /// leaves the cache alone and hands back the last good reading marked
    /// [`Freshness::Stale`]; the error only surfaces when nothing was ever
    /// cached.
    pub async fn fetch_at(&self, now: DateTime<Utc>) -> Result<Fetched, SourceError> {
        ensure_metrics_described();

        let ttl = Duration::minutes(i64::from(self.ttl_minutes));
        if let Some(reading) = self.cache.fresh_at(ttl, now) {
            tracing::debug!(source = %self.id, "serving cached reading");
            counter!("xrate_source_fetch_total", "source" => self.id.clone(), "result" => "cached")
                .increment(1);
            return Ok(Fetched {
                reading,
                freshness: Freshness::Cached,
            });
        }

        let t0 = Instant::now();
        let result = self.inner.fetch_fresh().await;
        histogram!("xrate_source_fetch_ms", "source" => self.id.clone())
            .record(t0.elapsed().as_secs_f64() * 1_000.0);

        match result {
            Ok(reading) => {
                self.cache.store(reading.clone(), now);
                counter!("xrate_source_fetch_total", "source" => self.id.clone(), "result" => "fresh")
                    .increment(1);
                Ok(Fetched {
                    reading,
                    freshness: Freshness::Fresh,
                })
            }
            Err(e) => match self.cache.latest() {
                Some((reading, fetched_at)) => {
                    tracing::warn!(error = %e, source = %self.id, %fetched_at, "refresh failed, serving stale reading");
                    counter!("xrate_source_fetch_total", "source" => self.id.clone(), "result" => "stale")
                        .increment(1);
                    Ok(Fetched {
                        reading,
                        freshness: Freshness::Stale { fetched_at },
                    })
                }
                None => {
                    tracing::warn!(error = %e, source = %self.id, "source error");
                    counter!("xrate_source_fetch_total", "source" => self.id.clone(), "result" => "error")
                        .increment(1);
                    Err(e)
                }
            },
        }
    }
}

impl std::fmt::Debug for CachedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedSource")
            .field("id", &self.id)
            .field("ttl_minutes", &self.ttl_minutes)
            .finish()
    }
}
