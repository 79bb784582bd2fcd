use chrono::{DateTime, Utc};

use super::{parse_price, table_rows};
use crate::domain::{Instrument, Reading};
use crate::error::SourceError;

pub const NAME: &str = "bonbast";

/// Rows are `code | name | sell | buy`; the sell price sits in the third
/// cell. The first parsable row per instrument wins.
pub fn parse_bonbast(html: &str, now: DateTime<Utc>) -> Result<Reading, SourceError> {
    let mut usd = None;
    let mut eur = None;
    let mut gold = None;

    for cells in table_rows(html) {
        if cells.len() < 3 {
            continue;
        }
        let label = cells[0].to_uppercase();
        let slot = if label.contains("USD") || label.contains("US DOLLAR") {
            &mut usd
        } else if label.contains("EUR") {
            &mut eur
        } else if label.contains("GOLD") && label.contains("GRAM") {
            &mut gold
        } else {
            continue;
        };
        if slot.is_none() {
            *slot = parse_price(&cells[2]);
        }
    }

    let reading = Reading::new(NAME, now)
        .with_opt(Instrument::UsdToman, usd)
        .with_opt(Instrument::EurToman, eur)
        .with_opt(Instrument::Gold1gToman, gold);
    if reading.is_empty() {
        tracing::warn!(source = NAME, "no prices found in page");
        return Err(SourceError::malformed(NAME, "no USD/EUR/gold rows"));
    }
    Ok(reading)
}
