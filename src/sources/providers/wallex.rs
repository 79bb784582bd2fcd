//! Wallex public markets endpoint, USDT-TMN pair only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::json_number;
use crate::domain::{Instrument, Reading};
use crate::error::SourceError;
use crate::sources::http::HttpFetcher;
use crate::sources::RateSource;

pub const NAME: &str = "wallex";
const URL: &str = "https://api.wallex.ir/v1/markets";

pub struct WallexSource {
    http: HttpFetcher,
}

impl WallexSource {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }
}

/// `result.symbols.USDTTMN.stats.{lastPrice, 24h_ch}`; both must be present.
pub fn parse_wallex(body: &str, now: DateTime<Utc>) -> Result<Reading, SourceError> {
    let data: Value =
        serde_json::from_str(body).map_err(|e| SourceError::malformed(NAME, format!("invalid JSON: {e}")))?;
    let symbols = data
        .get("result")
        .and_then(|r| r.get("symbols"))
        .ok_or_else(|| SourceError::malformed(NAME, "missing result.symbols"))?;
    let stats = symbols
        .get("USDTTMN")
        .and_then(|s| s.get("stats"))
        .ok_or_else(|| SourceError::malformed(NAME, "USDTTMN not listed"))?;

    let (Some(price), Some(change)) = (
        stats.get("lastPrice").and_then(json_number),
        stats.get("24h_ch").and_then(json_number),
    ) else {
        return Err(SourceError::malformed(NAME, "USDTTMN stats missing lastPrice or 24h_ch"));
    };

    Ok(Reading::new(NAME, now)
        .with_value(Instrument::TetherToman, price.trunc())
        .with_value(Instrument::Tether24hChangePct, change))
}

#[async_trait]
impl RateSource for WallexSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch_fresh(&self) -> Result<Reading, SourceError> {
        tracing::info!(source = NAME, "fetching fresh data");
        let body = self.http.get_text(NAME, URL).await?;
        parse_wallex(&body, Utc::now())
    }
}
