//! FastForex `fetch-all` (base USD). The API quotes EUR per USD; we store
//! USD per EUR.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

use crate::domain::{Instrument, Reading};
use crate::error::SourceError;
use crate::sources::http::HttpFetcher;
use crate::sources::RateSource;

pub const NAME: &str = "fastforex";
const BASE_URL: &str = "https://api.fastforex.io/fetch-all";

#[derive(Debug, Deserialize)]
struct FetchAll {
    #[serde(default)]
    results: HashMap<String, f64>,
}

pub struct FastForexSource {
    http: HttpFetcher,
    url: String,
}

impl FastForexSource {
    pub fn new(http: HttpFetcher, api_key: &str) -> Self {
        Self {
            http,
            url: format!("{BASE_URL}?api_key={api_key}"),
        }
    }
}

pub fn parse_fastforex(body: &str, now: DateTime<Utc>) -> Result<Reading, SourceError> {
    let data: FetchAll =
        serde_json::from_str(body).map_err(|e| SourceError::malformed(NAME, format!("invalid JSON: {e}")))?;
    let eur_per_usd = *data
        .results
        .get("EUR")
        .ok_or_else(|| SourceError::malformed(NAME, "missing results.EUR"))?;
    if eur_per_usd <= 0.0 || !eur_per_usd.is_finite() {
        return Err(SourceError::malformed(NAME, format!("non-positive EUR rate {eur_per_usd}")));
    }
    Ok(Reading::new(NAME, now).with_value(Instrument::EurUsdRate, 1.0 / eur_per_usd))
}

#[async_trait]
impl RateSource for FastForexSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch_fresh(&self) -> Result<Reading, SourceError> {
        tracing::info!(source = NAME, "fetching fresh EUR/USD");
        let body = self.http.get_text(NAME, &self.url).await?;
        parse_fastforex(&body, Utc::now())
    }
}
