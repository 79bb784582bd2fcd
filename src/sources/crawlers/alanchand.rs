use chrono::{DateTime, Utc};

use super::{parse_price, table_rows};
use crate::domain::{Instrument, Reading};
use crate::error::SourceError;

pub const NAME: &str = "alanchand";

fn is_usd(label: &str) -> bool {
    let upper = label.to_uppercase();
    label.contains("دلار آمریکا") || upper.contains("USD") || upper.contains("US DOLLAR")
}

fn is_eur(label: &str) -> bool {
    label.contains("یورو") || label.to_uppercase().contains("EUR")
}

fn is_gold_gram(label: &str) -> bool {
    label.contains("طلا") && (label.contains("18") || label.contains("عیار") || label.contains("گرم"))
}

/// Labels are Persian or English. The sell price is the third cell; when it
/// is blank or `-` the second cell is used.
pub fn parse_alanchand(html: &str, now: DateTime<Utc>) -> Result<Reading, SourceError> {
    let mut usd = None;
    let mut eur = None;
    let mut gold = None;

    for cells in table_rows(html) {
        if cells.len() < 3 {
            continue;
        }
        let label = cells[0].as_str();
        let slot = if is_usd(label) {
            &mut usd
        } else if is_eur(label) {
            &mut eur
        } else if is_gold_gram(label) {
            &mut gold
        } else {
            continue;
        };
        if slot.is_some() {
            continue;
        }
        let sell = match cells[2].trim() {
            "" | "-" => cells[1].as_str(),
            s => s,
        };
        *slot = parse_price(sell);
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
