//! # Persistence
//! On-disk JSON for the announced baseline, plus the atomic-write helper
//! shared with the stats file.
//!
//! Writes go to a temp file in the target directory, are fsynced, then
//! renamed over the target. A file that fails to parse is renamed to
//! `<name>.corrupt.<unix_ts>` and treated as absent.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Baseline, Instrument};
use crate::error::PersistError;

/// Persisted layout. Every field defaults so older or partial files still
/// load; a missing `ts` becomes "now" when converted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawState {
    pub usd_toman: f64,
    pub eur_toman: f64,
    pub gold_1g_toman: f64,
    pub eurusd_rate: f64,
    pub tether_price_toman: f64,
    pub tether_24h_ch: f64,
    pub ts: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<String>,
}

impl RawState {
    pub fn from_baseline(b: &Baseline) -> Self {
        Self {
            usd_toman: b.value(Instrument::UsdToman),
            eur_toman: b.value(Instrument::EurToman),
            gold_1g_toman: b.value(Instrument::Gold1gToman),
            eurusd_rate: b.value(Instrument::EurUsdRate),
            tether_price_toman: b.value(Instrument::TetherToman),
            tether_24h_ch: b.value(Instrument::Tether24hChangePct),
            ts: Some(b.timestamp),
            providers: b.sources.clone(),
        }
    }

    /// Zero prices mean "never announced" and are left out. The 24h change
    /// only counts when a Tether price is present.
    pub fn into_baseline(self, now: DateTime<Utc>) -> Baseline {
        let mut values = std::collections::BTreeMap::new();
        let prices = [
            (Instrument::UsdToman, self.usd_toman),
            (Instrument::EurToman, self.eur_toman),
            (Instrument::Gold1gToman, self.gold_1g_toman),
            (Instrument::EurUsdRate, self.eurusd_rate),
            (Instrument::TetherToman, self.tether_price_toman),
        ];
        for (i, v) in prices {
            if v.is_finite() && v > 0.0 {
                values.insert(i, v);
            }
        }
        if values.contains_key(&Instrument::TetherToman) && self.tether_24h_ch.is_finite() {
            values.insert(Instrument::Tether24hChangePct, self.tether_24h_ch);
        }
        Baseline {
            values,
            timestamp: self.ts.unwrap_or(now),
            sources: self.providers,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Absent,
    Loaded(RawState),
    /// The file existed but could not be used; it has been moved aside.
    Corrupt { quarantined_to: Option<PathBuf> },
}

pub trait StateStore: Send + Sync {
    fn load(&self) -> LoadOutcome;
    fn save(&self, state: &RawState) -> Result<(), PersistError>;
}

fn io_err(path: &Path, source: std::io::Error) -> PersistError {
    PersistError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Write `value` as pretty JSON to `path` without ever exposing a partial file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

    let body = serde_json::to_vec_pretty(value)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".xrate-")
        .suffix(".json.tmp")
        .tempfile_in(&dir)
        .map_err(|e| io_err(&dir, e))?;
    tmp.write_all(&body).map_err(|e| io_err(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| io_err(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| io_err(path, e.error))?;
    Ok(())
}

/// Move an unreadable file out of the way. Returns the new path on success.
pub fn quarantine(path: &Path, now: DateTime<Utc>) -> Option<PathBuf> {
    let name = path.file_name()?.to_string_lossy().into_owned();
    let target = path.with_file_name(format!("{name}.corrupt.{}", now.timestamp()));
    match fs::rename(path, &target) {
        Ok(()) => {
            tracing::warn!(from = %path.display(), to = %target.display(), "quarantined corrupt file");
            Some(target)
        }
        Err(e) => {
            tracing::error!(error = %e, path = %path.display(), "failed to quarantine corrupt file");
            None
        }
    }
}

/// Read and decode a JSON file; a decode failure quarantines it.
pub fn read_json_or_quarantine<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, Option<PathBuf>> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            tracing::error!(error = %e, path = %path.display(), "failed to read file");
            return Err(None);
        }
    };
    match serde_json::from_str::<T>(&text) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "file is not valid JSON for its schema");
            Err(quarantine(path, Utc::now()))
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStore {
    fn load(&self) -> LoadOutcome {
        match read_json_or_quarantine::<RawState>(&self.path) {
            Ok(None) => LoadOutcome::Absent,
            Ok(Some(raw)) => LoadOutcome::Loaded(raw),
            Err(quarantined_to) => LoadOutcome::Corrupt { quarantined_to },
        }
    }

    fn save(&self, state: &RawState) -> Result<(), PersistError> {
        write_json_atomic(&self.path, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn zero_prices_are_absent_on_load() {
        let raw = RawState {
            usd_toman: 108_400.0,
            tether_24h_ch: -0.4,
            ..RawState::default()
        };
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let b = raw.into_baseline(now);
        assert_eq!(b.values.len(), 1);
        assert_eq!(b.timestamp, now);
    }

    #[test]
    fn legacy_file_without_tether_fields_parses() {
        let raw: RawState = serde_json::from_str(
            r#"{"usd_toman":108400,"eur_toman":126000,"gold_1g_toman":10812360,"eurusd_rate":1.16,"ts":"2025-01-10T08:00:00+00:00"}"#,
        )
        .unwrap();
        assert_eq!(raw.tether_price_toman, 0.0);
        assert_eq!(raw.ts, Some(Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap()));
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        write_json_atomic(&path, &RawState::default()).unwrap();
        write_json_atomic(&path, &RawState::default()).unwrap();
        let names: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["state.json".to_string()]);
    }
}
