//! BRS market API: USD / EUR in toman, 18k gold per gram, and the EUR→USD
//! rate derived from the two toman quotes.
//!
//! Payload is either an object or a one-element array of it:
//! `{"gold": [{"symbol": "IR_GOLD_18K", "price": ..}], "currency": [{"symbol": "USD", ..}]}`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::json_number;
use crate::domain::{Instrument, Reading};
use crate::error::SourceError;
use crate::sources::http::HttpFetcher;
use crate::sources::RateSource;

pub const NAME: &str = "brsapi";
const BASE_URL: &str = "https://brsapi.ir/Api/Market/Gold_Currency.php";

pub struct BrsApiSource {
    http: HttpFetcher,
    url: String,
}

impl BrsApiSource {
    pub fn new(http: HttpFetcher, api_key: &str) -> Self {
        Self {
            http,
            url: format!("{BASE_URL}?key={api_key}"),
        }
    }
}

fn find_price(items: Option<&Value>, symbol: &str) -> Option<f64> {
    items?
        .as_array()?
        .iter()
        .find(|it| it.get("symbol").and_then(Value::as_str) == Some(symbol))
        .and_then(|it| it.get("price"))
        .and_then(json_number)
}

pub fn parse_brsapi(body: &str, now: DateTime<Utc>) -> Result<Reading, SourceError> {
    let data: Value =
        serde_json::from_str(body).map_err(|e| SourceError::malformed(NAME, format!("invalid JSON: {e}")))?;
    let data = match data {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        v @ Value::Object(_) => v,
        _ => return Err(SourceError::malformed(NAME, "unexpected top-level JSON type")),
    };
    if data.get("gold").is_none() || data.get("currency").is_none() {
        return Err(SourceError::malformed(NAME, "missing gold/currency arrays"));
    }

    let currency = data.get("currency");
    let usd = find_price(currency, "USD");
    let eur = find_price(currency, "EUR");
    let gold = find_price(data.get("gold"), "IR_GOLD_18K");

    let eur_usd = match (usd, eur) {
        (Some(u), Some(e)) if u > 0.0 && e > 0.0 => Some(e / u),
        _ => None,
    };

    let reading = Reading::new(NAME, now)
        .with_opt(Instrument::UsdToman, usd.map(f64::trunc))
        .with_opt(Instrument::EurToman, eur.map(f64::trunc))
        .with_opt(Instrument::Gold1gToman, gold.map(f64::trunc))
        .with_opt(Instrument::EurUsdRate, eur_usd);

    if reading.is_empty() {
        return Err(SourceError::malformed(NAME, "no USD/EUR/IR_GOLD_18K prices"));
    }
    Ok(reading)
}

#[async_trait]
impl RateSource for BrsApiSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch_fresh(&self) -> Result<Reading, SourceError> {
        tracing::info!(source = NAME, "fetching fresh data");
        let body = self.http.get_text(NAME, &self.url).await?;
        parse_brsapi(&body, Utc::now())
    }
}
