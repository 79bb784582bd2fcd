// src/config/settings.rs
use anyhow::{anyhow, bail, Context, Result};
use chrono::Weekday;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::domain::Instrument;
use crate::hysteresis::Thresholds;

const ENV_CONFIG_PATH: &str = "XRATE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/xrate.toml";

const MINUTES_RANGE: std::ops::RangeInclusive<u32> = 1..=1440;
const TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 1..=60;

static RE_CHANNEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(@[A-Za-z0-9_]+|-100\d+|\d+)$").expect("channel regex"));
static RE_BOT_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{8,10}:[A-Za-z0-9_-]{35}$").expect("token regex"));

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelegramSettings {
    pub bot_token: Option<String>,
    pub channel_id: Option<String>,
    /// Secondary channel; deliveries there are best-effort.
    pub test_channel_id: Option<String>,
}

/// Missing or blank keys leave the matching source out of every chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiKeys {
    pub fastforex: Option<String>,
    pub navasan: Option<String>,
    pub brsapi: Option<String>,
}

/// Per-source cache TTL in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheTtls {
    pub fastforex: u32,
    pub navasan: u32,
    pub brsapi: u32,
    pub wallex: u32,
    pub bonbast: u32,
    pub alanchand: u32,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            fastforex: 15,
            navasan: 28,
            brsapi: 15,
            wallex: 15,
            bonbast: 37,
            alanchand: 43,
        }
    }
}

impl CacheTtls {
    /// `(source, minutes)` pairs in a fixed order.
    pub fn entries(&self) -> [(&'static str, u32); 6] {
        [
            ("fastforex", self.fastforex),
            ("navasan", self.navasan),
            ("brsapi", self.brsapi),
            ("wallex", self.wallex),
            ("bonbast", self.bonbast),
            ("alanchand", self.alanchand),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ThresholdTable {
    pub usd: Thresholds,
    pub eur: Thresholds,
    pub gold: Thresholds,
    pub eurusd: Thresholds,
    pub tether: Thresholds,
}

impl ThresholdTable {
    pub fn for_instrument(&self, instrument: Instrument) -> Thresholds {
        match instrument {
            Instrument::UsdToman => self.usd,
            Instrument::EurToman => self.eur,
            Instrument::Gold1gToman => self.gold,
            Instrument::EurUsdRate => self.eurusd,
            Instrument::TetherToman | Instrument::Tether24hChangePct => self.tether,
        }
    }

    fn slot_mut(&mut self, key: &str) -> Option<&mut Thresholds> {
        match key {
            "USD" => Some(&mut self.usd),
            "EUR" => Some(&mut self.eur),
            "GOLD" => Some(&mut self.gold),
            "EURUSD" => Some(&mut self.eurusd),
            "TETHER" => Some(&mut self.tether),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailyReportSettings {
    /// `None` disables the report.
    pub hour_utc: Option<u32>,
    pub skip_days: Vec<Weekday>,
}

impl Default for DailyReportSettings {
    fn default() -> Self {
        Self {
            hour_utc: None,
            skip_days: vec![Weekday::Thu, Weekday::Fri],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub telegram: TelegramSettings,
    pub keys: ApiKeys,
    pub http_timeout_secs: u64,
    pub ttl: CacheTtls,
    pub crawler1_url: String,
    pub crawler2_url: String,
    pub thresholds: ThresholdTable,
    pub state_file: PathBuf,
    pub stats_file: PathBuf,
    pub bind_addr: SocketAddr,
    pub daily_report: DailyReportSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            telegram: TelegramSettings::default(),
            keys: ApiKeys::default(),
            http_timeout_secs: 10,
            ttl: CacheTtls::default(),
            crawler1_url: "https://www.bonbast.com/".into(),
            crawler2_url: "https://alanchand.com/".into(),
            thresholds: ThresholdTable::default(),
            state_file: PathBuf::from("./data/last_state.json"),
            stats_file: PathBuf::from("./data/stats.json"),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            daily_report: DailyReportSettings::default(),
        }
    }
}

/// Optional TOML overlay. Secrets (bot token, API keys) are env-only.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub telegram: FileTelegram,
    pub sources: FileSources,
    pub thresholds: Option<ThresholdTable>,
    pub persistence: FilePersistence,
    pub server: FileServer,
    pub daily_report: FileDailyReport,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileTelegram {
    pub channel_id: Option<String>,
    pub test_channel_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileSources {
    pub http_timeout_seconds: Option<u64>,
    pub cache_minutes: Option<CacheTtls>,
    pub crawler1_url: Option<String>,
    pub crawler2_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FilePersistence {
    pub state_file: Option<PathBuf>,
    pub stats_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileServer {
    pub bind_addr: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileDailyReport {
    pub hour_utc: Option<u32>,
    pub skip_days: Option<Vec<String>>,
}

pub fn load_file_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_env<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_blank(lookup(key)) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("invalid value for {key}: {raw:?} ({e})")),
    }
}

fn parse_weekdays(raw: &[String]) -> Result<Vec<Weekday>> {
    raw.iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Weekday>().map_err(|_| anyhow!("unknown weekday {s:?}")))
        .collect()
}

impl Settings {
    /// `.env` → optional TOML file (`$XRATE_CONFIG`, else `config/xrate.toml`
    /// when present) → environment variables, then validation.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let file = match std::env::var(ENV_CONFIG_PATH) {
            Ok(p) => {
                let pb = PathBuf::from(p);
                if !pb.exists() {
                    bail!("{ENV_CONFIG_PATH} points to non-existent path {}", pb.display());
                }
                Some(load_file_config(&pb)?)
            }
            Err(_) => {
                let pb = PathBuf::from(DEFAULT_CONFIG_PATH);
                if pb.exists() {
                    Some(load_file_config(&pb)?)
                } else {
                    None
                }
            }
        };

        Self::from_sources(file, |k| std::env::var(k).ok())
    }

    pub fn from_sources(file: Option<FileConfig>, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut s = Settings::default();
        if let Some(f) = file {
            s.apply_file(f)?;
        }
        s.apply_env(&lookup)?;
        s.validate()?;
        Ok(s)
    }

    fn apply_file(&mut self, f: FileConfig) -> Result<()> {
        if let Some(v) = non_blank(f.telegram.channel_id) {
            self.telegram.channel_id = Some(v);
        }
        if let Some(v) = non_blank(f.telegram.test_channel_id) {
            self.telegram.test_channel_id = Some(v);
        }
        if let Some(v) = f.sources.http_timeout_seconds {
            self.http_timeout_secs = v;
        }
        if let Some(v) = f.sources.cache_minutes {
            self.ttl = v;
        }
        if let Some(v) = non_blank(f.sources.crawler1_url) {
            self.crawler1_url = v;
        }
        if let Some(v) = non_blank(f.sources.crawler2_url) {
            self.crawler2_url = v;
        }
        if let Some(t) = f.thresholds {
            self.thresholds = t;
        }
        if let Some(p) = f.persistence.state_file {
            self.state_file = p;
        }
        if let Some(p) = f.persistence.stats_file {
            self.stats_file = p;
        }
        if let Some(addr) = non_blank(f.server.bind_addr) {
            self.bind_addr = addr
                .parse()
                .with_context(|| format!("invalid server.bind_addr {addr:?}"))?;
        }
        if let Some(h) = f.daily_report.hour_utc {
            self.daily_report.hour_utc = Some(h);
        }
        if let Some(days) = f.daily_report.skip_days {
            self.daily_report.skip_days = parse_weekdays(&days)?;
        }
        Ok(())
    }

    fn apply_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = non_blank(lookup("BOT_TOKEN")) {
            self.telegram.bot_token = Some(v);
        }
        if let Some(v) = non_blank(lookup("CHANNEL_ID")) {
            self.telegram.channel_id = Some(v);
        }
        if let Some(v) = non_blank(lookup("TEST_CHANNEL_ID")) {
            self.telegram.test_channel_id = Some(v);
        }

        self.keys.fastforex = non_blank(lookup("FASTFOREX_KEY")).or(self.keys.fastforex.take());
        self.keys.navasan = non_blank(lookup("NAVASAN_API_KEY")).or(self.keys.navasan.take());
        self.keys.brsapi = non_blank(lookup("BRSAPI_KEY")).or(self.keys.brsapi.take());

        if let Some(v) = parse_env(lookup, "HTTP_TIMEOUT_SECONDS")? {
            self.http_timeout_secs = v;
        }

        let ttl_keys: [(&str, &mut u32); 6] = [
            ("FASTFOREX_CACHE_MINUTES", &mut self.ttl.fastforex),
            ("NAVASAN_CACHE_MINUTES", &mut self.ttl.navasan),
            ("BRSAPI_CACHE_MINUTES", &mut self.ttl.brsapi),
            ("WALLEX_CACHE_MINUTES", &mut self.ttl.wallex),
            ("CRAWLER1_INTERVAL_MINUTES", &mut self.ttl.bonbast),
            ("CRAWLER2_INTERVAL_MINUTES", &mut self.ttl.alanchand),
        ];
        for (key, slot) in ttl_keys {
            if let Some(v) = parse_env(lookup, key)? {
                *slot = v;
            }
        }

        if let Some(v) = non_blank(lookup("CRAWLER1_URL")) {
            self.crawler1_url = v;
        }
        if let Some(v) = non_blank(lookup("CRAWLER2_URL")) {
            self.crawler2_url = v;
        }

        for name in ["USD", "EUR", "GOLD", "EURUSD", "TETHER"] {
            let upper: Option<f64> = parse_env(lookup, &format!("MARGIN_{name}_UPPER_PCT"))?;
            let lower: Option<f64> = parse_env(lookup, &format!("MARGIN_{name}_LOWER_PCT"))?;
            if let Some(slot) = self.thresholds.slot_mut(name) {
                if let Some(u) = upper {
                    slot.upper_pct = u;
                }
                if let Some(l) = lower {
                    slot.lower_pct = l;
                }
            }
        }

        if let Some(v) = non_blank(lookup("LAST_STATE_FILE")) {
            self.state_file = PathBuf::from(v);
        }
        if let Some(v) = non_blank(lookup("STATS_FILE")) {
            self.stats_file = PathBuf::from(v);
        }
        if let Some(v) = parse_env(lookup, "BIND_ADDR")? {
            self.bind_addr = v;
        }
        if let Some(v) = parse_env(lookup, "DAILY_REPORT_HOUR_UTC")? {
            self.daily_report.hour_utc = Some(v);
        }
        if let Some(raw) = non_blank(lookup("DAILY_REPORT_SKIP_DAYS")) {
            let parts: Vec<String> = raw.split(',').map(str::to_string).collect();
            self.daily_report.skip_days = parse_weekdays(&parts)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !TIMEOUT_RANGE.contains(&self.http_timeout_secs) {
            bail!("HTTP_TIMEOUT_SECONDS must be within 1..=60, got {}", self.http_timeout_secs);
        }
        for (name, minutes) in self.ttl.entries() {
            if !MINUTES_RANGE.contains(&minutes) {
                bail!("{name} cache minutes must be within 1..=1440, got {minutes}");
            }
        }

        for i in Instrument::ALL {
            let t = self.thresholds.for_instrument(i);
            if !(t.upper_pct.is_finite() && t.lower_pct.is_finite()) || t.upper_pct < 0.0 || t.lower_pct < 0.0 {
                bail!("thresholds for {i} must be finite and >= 0");
            }
        }

        if let Some(h) = self.daily_report.hour_utc {
            if h > 23 {
                bail!("DAILY_REPORT_HOUR_UTC must be within 0..=23, got {h}");
            }
        }

        if let Some(token) = &self.telegram.bot_token {
            if !RE_BOT_TOKEN.is_match(token) {
                bail!("Invalid BOT_TOKEN format");
            }
            match &self.telegram.channel_id {
                None => bail!("CHANNEL_ID is required when BOT_TOKEN is set"),
                Some(c) if !RE_CHANNEL.is_match(c) => bail!("Invalid CHANNEL_ID format: {c}"),
                Some(_) => {}
            }
        }
        if let Some(c) = &self.telegram.test_channel_id {
            if !RE_CHANNEL.is_match(c) {
                bail!("Invalid TEST_CHANNEL_ID format: {c}");
            }
        }
        Ok(())
    }

    /// Scheduler cadence: the fastest API cache TTL.
    pub fn post_interval_minutes(&self) -> u32 {
        [self.ttl.fastforex, self.ttl.navasan, self.ttl.brsapi, self.ttl.wallex]
            .into_iter()
            .min()
            .unwrap_or(15)
    }
}
