//! # Domain
//! Tracked instruments, immutable readings and the announced baseline.
//!
//! A `Reading` is built fresh on every fetch and never mutated afterwards.
//! Price values that are not strictly positive are dropped on insertion so an
//! invalid quote can never reach the breach engine or the baseline.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single tracked quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Instrument {
    UsdToman,
    EurToman,
    Gold1gToman,
    EurUsdRate,
    TetherToman,
    /// Signed 24h change in percent, reported by the Tether market itself.
    Tether24hChangePct,
}

impl Instrument {
    pub const ALL: [Instrument; 6] = [
        Instrument::UsdToman,
        Instrument::EurToman,
        Instrument::Gold1gToman,
        Instrument::EurUsdRate,
        Instrument::TetherToman,
        Instrument::Tether24hChangePct,
    ];

    /// Prices must be positive; the 24h change is a signed percentage.
    pub fn is_price(self) -> bool {
        !matches!(self, Instrument::Tether24hChangePct)
    }

    /// Stable short key, used in logs, metrics labels and the status endpoint.
    pub fn key(self) -> &'static str {
        match self {
            Instrument::UsdToman => "usd",
            Instrument::EurToman => "eur",
            Instrument::Gold1gToman => "gold",
            Instrument::EurUsdRate => "eurusd",
            Instrument::TetherToman => "tether",
            Instrument::Tether24hChangePct => "tether_24h",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Instrument::UsdToman => "USD",
            Instrument::EurToman => "EUR",
            Instrument::Gold1gToman => "Gold 18k (1g)",
            Instrument::EurUsdRate => "EUR/USD",
            Instrument::TetherToman => "Tether",
            Instrument::Tether24hChangePct => "Tether 24h",
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One fetch result from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    values: BTreeMap<Instrument, f64>,
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn new(source_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            values: BTreeMap::new(),
            source_id: source_id.into(),
            timestamp,
        }
    }

    /// Builder-style insert. Invalid values (non-finite, or non-positive prices)
    /// are treated as absent.
    pub fn with_value(mut self, instrument: Instrument, value: f64) -> Self {
        if is_valid(instrument, value) {
            self.values.insert(instrument, value);
        }
        self
    }

    /// Same as [`Reading::with_value`] for optional parser output.
    pub fn with_opt(self, instrument: Instrument, value: Option<f64>) -> Self {
        match value {
            Some(v) => self.with_value(instrument, v),
            None => self,
        }
    }

    pub fn get(&self, instrument: Instrument) -> Option<f64> {
        self.values.get(&instrument).copied()
    }

    pub fn has_all(&self, required: &[Instrument]) -> bool {
        required.iter().all(|i| self.values.contains_key(i))
    }

    pub fn missing(&self, required: &[Instrument]) -> Vec<Instrument> {
        required
            .iter()
            .copied()
            .filter(|i| !self.values.contains_key(i))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = (Instrument, f64)> + '_ {
        self.values.iter().map(|(i, v)| (*i, *v))
    }

    /// Copy restricted to `keep`, re-tagged with `source_id`.
    pub fn project(&self, keep: &[Instrument], source_id: &str) -> Reading {
        Reading {
            values: self
                .values
                .iter()
                .filter(|(i, _)| keep.contains(i))
                .map(|(i, v)| (*i, *v))
                .collect(),
            source_id: source_id.to_string(),
            timestamp: self.timestamp,
        }
    }
}

fn is_valid(instrument: Instrument, value: f64) -> bool {
    value.is_finite() && (!instrument.is_price() || value > 0.0)
}

/// Everything gathered in one scheduler cycle, possibly from several sources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketUpdate {
    pub readings: Vec<Reading>,
}

impl MarketUpdate {
    pub fn push(&mut self, reading: Reading) {
        self.readings.push(reading);
    }

    pub fn is_empty(&self) -> bool {
        self.readings.iter().all(Reading::is_empty)
    }

    pub fn get(&self, instrument: Instrument) -> Option<f64> {
        self.readings.iter().find_map(|r| r.get(instrument))
    }

    pub fn values(&self) -> BTreeMap<Instrument, f64> {
        let mut out = BTreeMap::new();
        for r in &self.readings {
            for (i, v) in r.values() {
                out.entry(i).or_insert(v);
            }
        }
        out
    }

    pub fn sources(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for r in &self.readings {
            if !r.is_empty() && !out.contains(&r.source_id) {
                out.push(r.source_id.clone());
            }
        }
        out
    }
}

/// The last announced value set. Exactly one exists per process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub values: BTreeMap<Instrument, f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl Baseline {
    /// Missing instruments read as 0, which the breach engine treats as
    /// "nothing to compare against".
    pub fn value(&self, instrument: Instrument) -> f64 {
        self.values.get(&instrument).copied().unwrap_or(0.0)
    }

    /// New baseline from `update`; instruments absent from the update keep
    /// their previous value.
    pub fn merged(
        previous: Option<&Baseline>,
        update: &BTreeMap<Instrument, f64>,
        sources: Vec<String>,
        timestamp: DateTime<Utc>,
    ) -> Baseline {
        let mut values = previous.map(|b| b.values.clone()).unwrap_or_default();
        for (i, v) in update {
            values.insert(*i, *v);
        }
        Baseline {
            values,
            timestamp,
            sources,
        }
    }
}

/// Direction of the last confirmed breach for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    None,
    Up,
    Down,
}
