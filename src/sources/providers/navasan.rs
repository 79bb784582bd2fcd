//! Navasan `latest` endpoint. Each key maps to either a primitive or an
//! object like `{"value": "108400", "change": 1100, ...}`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::json_number;
use crate::domain::{Instrument, Reading};
use crate::error::SourceError;
use crate::sources::http::HttpFetcher;
use crate::sources::RateSource;

pub const NAME: &str = "navasan";
const BASE_URL: &str = "http://api.navasan.tech/latest/";

pub struct NavasanSource {
    http: HttpFetcher,
    url: String,
}

impl NavasanSource {
    pub fn new(http: HttpFetcher, api_key: &str) -> Self {
        Self {
            http,
            url: format!("{BASE_URL}?api_key={api_key}"),
        }
    }
}

fn extract(data: &Value, key: &str) -> Option<f64> {
    let node = data.get(key)?;
    let value = match node {
        Value::Object(obj) => obj.get("value")?,
        other => other,
    };
    json_number(value).map(f64::trunc)
}

pub fn parse_navasan(body: &str, now: DateTime<Utc>) -> Result<Reading, SourceError> {
    let data: Value =
        serde_json::from_str(body).map_err(|e| SourceError::malformed(NAME, format!("invalid JSON: {e}")))?;
    if !data.is_object() {
        return Err(SourceError::malformed(NAME, "non-object JSON"));
    }

    let reading = Reading::new(NAME, now)
        .with_opt(Instrument::UsdToman, extract(&data, "usd"))
        .with_opt(Instrument::EurToman, extract(&data, "eur"))
        .with_opt(Instrument::Gold1gToman, extract(&data, "18ayar"));

    if reading.is_empty() {
        return Err(SourceError::malformed(NAME, "usd/eur/18ayar not found"));
    }
    Ok(reading)
}

#[async_trait]
impl RateSource for NavasanSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch_fresh(&self) -> Result<Reading, SourceError> {
        tracing::info!(source = NAME, "fetching fresh data");
        let body = self.http.get_text(NAME, &self.url).await?;
        parse_navasan(&body, Utc::now())
    }
}
