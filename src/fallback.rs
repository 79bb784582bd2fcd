//! # Fallback resolver
//! Walks an ordered chain of cached sources for one composite reading.
//!
//! Only sources the eligibility gate lets through are queried. The first
//! fresh reading that carries every required instrument wins and is projected
//! down to exactly those instruments, so partial data from one source is never
//! combined with another source's values. A stale reading (the source's
//! refresh failed) never wins; it counts as a failure of that source.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{Instrument, Reading};
use crate::gate::EligibilityGate;
use crate::sources::{CachedSource, Fetched, Freshness};

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Complete reading, tagged with the winning source id.
    Ready(Reading),
    /// Every source in the chain is still inside its cooldown.
    NotDue,
    /// Queried sources all failed or came back incomplete.
    AllSourcesUnavailable { failures: Vec<SourceFailure> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct FallbackResolver {
    name: String,
    required: Vec<Instrument>,
    chain: Vec<Arc<CachedSource>>,
}

impl FallbackResolver {
    pub fn new(name: impl Into<String>, required: &[Instrument], chain: Vec<Arc<CachedSource>>) -> Self {
        Self {
            name: name.into(),
            required: required.to_vec(),
            chain,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn required(&self) -> &[Instrument] {
        &self.required
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.chain.iter().map(|s| s.id().to_string()).collect()
    }

    pub async fn resolve_at(&self, gate: &mut EligibilityGate, now: DateTime<Utc>) -> Resolution {
        let mut failures = Vec::new();
        let mut attempted = false;

        for source in &self.chain {
            if !gate.should_fetch_at(source.id(), source.ttl_minutes(), now) {
                continue;
            }
            attempted = true;

            match source.fetch_at(now).await {
                Ok(Fetched {
                    freshness: Freshness::Stale { fetched_at },
                    ..
                }) => {
                    tracing::warn!(
                        composite = %self.name,
                        source = source.id(),
                        %fetched_at,
                        "only a stale reading available, trying next source"
                    );
                    failures.push(SourceFailure {
                        source: source.id().to_string(),
                        reason: format!("refresh failed, last good reading from {fetched_at}"),
                    });
                }
                Ok(Fetched { reading, .. }) if reading.has_all(&self.required) => {
                    tracing::debug!(composite = %self.name, source = source.id(), "resolved");
                    return Resolution::Ready(reading.project(&self.required, source.id()));
                }
                Ok(Fetched { reading, .. }) => {
                    let missing: Vec<&str> = reading.missing(&self.required).iter().map(|i| i.key()).collect();
                    tracing::warn!(
                        composite = %self.name,
                        source = source.id(),
                        missing = ?missing,
                        "incomplete reading, trying next source"
                    );
                    failures.push(SourceFailure {
                        source: source.id().to_string(),
                        reason: format!("missing {}", missing.join(",")),
                    });
                }
                Err(e) => {
                    failures.push(SourceFailure {
                        source: source.id().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if attempted {
            Resolution::AllSourcesUnavailable { failures }
        } else {
            tracing::debug!(composite = %self.name, "no source eligible this cycle");
            Resolution::NotDue
        }
    }
}
