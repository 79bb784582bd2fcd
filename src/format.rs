//! Message text for the channel. Pure functions, HTML parse mode.

use std::collections::BTreeMap;

use crate::domain::{Baseline, Instrument};

const DISPLAY_ORDER: [Instrument; 5] = [
    Instrument::UsdToman,
    Instrument::EurToman,
    Instrument::Gold1gToman,
    Instrument::EurUsdRate,
    Instrument::TetherToman,
];

fn arrow(delta: f64) -> &'static str {
    if delta > 0.0 {
        "📈"
    } else if delta < 0.0 {
        "📉"
    } else {
        "⏸"
    }
}

/// Signed change vs `prev`, one decimal: `+2.0% 📈`. `n/a` without a baseline.
pub fn format_pct(curr: f64, prev: f64) -> String {
    if prev <= 0.0 {
        return "n/a".to_string();
    }
    let delta = (curr - prev) / prev * 100.0;
    // keep "-0.0" out of the output
    let shown = if (delta * 10.0).round() == 0.0 { 0.0 } else { delta };
    format!("{shown:+.1}% {}", arrow(shown))
}

/// `2h:05min` or `7min`.
pub fn format_elapsed(seconds: i64) -> String {
    let minutes = seconds.max(0) / 60;
    let (hours, mins) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{hours}h:{mins:02}min")
    } else {
        format!("{mins}min")
    }
}

pub fn attribution(providers: &[String]) -> Option<String> {
    if providers.is_empty() {
        None
    } else {
        Some(format!("Reported by {}", providers.join(" and ")))
    }
}

fn price_line(instrument: Instrument, value: f64, change: &str) -> String {
    let body = match instrument {
        Instrument::UsdToman => format!("(USD 💵) $1 = {:.1} KToman", value / 1_000.0),
        Instrument::EurToman => format!("(Euro 💶) €1 = {:.1} KToman", value / 1_000.0),
        Instrument::Gold1gToman => format!("(Gold 🏆) 1gr = {:.3} MToman", value / 1_000_000.0),
        Instrument::EurUsdRate => format!("(Euro 💶) €1 = ${value:.4} (USD 💵)"),
        Instrument::TetherToman => format!("(Tether 💎) 1 USDT = {:.1} KToman", value / 1_000.0),
        Instrument::Tether24hChangePct => format!("(Tether 24h) {value:+.2}%"),
    };
    if change.is_empty() {
        body
    } else {
        format!("{body}   {change}")
    }
}

fn tether_change(change_pct: Option<f64>) -> String {
    match change_pct {
        Some(c) => format!("{c:+.2}% {} (24h)", arrow(c)),
        None => String::new(),
    }
}

fn plain_lines(values: &BTreeMap<Instrument, f64>) -> Vec<String> {
    DISPLAY_ORDER
        .iter()
        .filter_map(|i| {
            let v = values.get(i)?;
            let change = if *i == Instrument::TetherToman {
                tether_change(values.get(&Instrument::Tether24hChangePct).copied())
            } else {
                String::new()
            };
            Some(price_line(*i, *v, &change))
        })
        .collect()
}

/// First post after a cold start: current values, no deltas.
pub fn initial_report(values: &BTreeMap<Instrument, f64>, providers: &[String]) -> String {
    let mut lines = vec!["<b>Market rates</b>".to_string(), String::new()];
    lines.extend(plain_lines(values));
    if let Some(a) = attribution(providers) {
        lines.push(String::new());
        lines.push(a);
    }
    lines.join("\n")
}

/// Breach post: one line per breached instrument with its change against the
/// baseline, then time since the previous announcement and attribution.
pub fn breach_update(
    current: &BTreeMap<Instrument, f64>,
    baseline: &Baseline,
    breached: &[Instrument],
    elapsed_seconds: i64,
    providers: &[String],
) -> String {
    let mut lines = vec!["<b>New market fluctuation observed</b>".to_string(), String::new()];

    for i in DISPLAY_ORDER.iter().filter(|i| breached.contains(i)) {
        let Some(v) = current.get(i).copied() else {
            continue;
        };
        let change = match i {
            Instrument::TetherToman => tether_change(current.get(&Instrument::Tether24hChangePct).copied()),
            _ => format_pct(v, baseline.value(*i)),
        };
        lines.push(price_line(*i, v, &change));
    }

    lines.push(String::new());
    lines.push(format!(
        "Time spent from previous announcement: {}",
        format_elapsed(elapsed_seconds)
    ));
    if let Some(a) = attribution(providers) {
        lines.push(a);
    }
    lines.join("\n")
}

/// Scheduled summary of the current baseline. Never mutates anything.
pub fn daily_report(baseline: Option<&Baseline>, elapsed_seconds: i64) -> String {
    let Some(b) = baseline.filter(|b| !b.values.is_empty()) else {
        return "No market data available".to_string();
    };
    let mut lines = vec!["<b>Daily price report:</b>".to_string(), String::new()];
    lines.extend(plain_lines(&b.values));
    lines.push(String::new());
    lines.push(format!(
        "Time spent from previous announcement: {}",
        format_elapsed(elapsed_seconds)
    ));
    lines.join("\n")
}
