//! # Breach / hysteresis engine
//! Decides whether a new value differs enough from the announced baseline.
//!
//! Policy:
//! - no baseline (previous <= 0) always announces;
//! - asymmetric bounds: `previous * (1 + upper/100)` and `previous * (1 - lower/100)`;
//! - after a confirmed breach, a further breach in the same direction needs an
//!   extra 0.2% beyond the bound;
//! - the remembered direction is cleared once the value sits at least 0.5%
//!   away from the baseline without breaching.
//!
//! Comparisons run on `rust_decimal` values rounded half-up to 4 places for
//! prices and 2 places for percentages, so exact boundary inputs do not
//! flicker with binary rounding.

use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::{Direction, Instrument};

const PRICE_DP: u32 = 4;
const PCT_DP: u32 = 2;

/// Upper/lower percentage pair for one instrument. Both are clamped at 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub upper_pct: f64,
    pub lower_pct: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            upper_pct: 1.0,
            lower_pct: 2.0,
        }
    }
}

impl Thresholds {
    pub fn new(upper_pct: f64, lower_pct: f64) -> Self {
        Self {
            upper_pct: upper_pct.max(0.0),
            lower_pct: lower_pct.max(0.0),
        }
    }
}

fn hysteresis_up() -> Decimal {
    Decimal::new(1002, 3)
}

fn hysteresis_down() -> Decimal {
    Decimal::new(998, 3)
}

fn reset_distance_pct() -> Decimal {
    Decimal::new(5, 1)
}

/// `f64` → `Decimal` through the shortest round-trip text form, then rounded.
fn to_decimal(value: f64, dp: u32) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_str(&value.to_string())
        .ok()
        .map(|d| d.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero))
}

/// Per-instrument hysteresis memory. In-memory only; a restart starts clean.
#[derive(Debug, Default, Clone)]
pub struct BreachEngine {
    directions: HashMap<Instrument, Direction>,
}

impl BreachEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn direction(&self, instrument: Instrument) -> Direction {
        self.directions
            .get(&instrument)
            .copied()
            .unwrap_or_default()
    }

    pub fn directions(&self) -> &HashMap<Instrument, Direction> {
        &self.directions
    }

    pub fn is_breach_with(
        &mut self,
        current: f64,
        previous: f64,
        thresholds: Thresholds,
        instrument: Instrument,
    ) -> bool {
        self.is_breach(
            current,
            previous,
            thresholds.upper_pct,
            thresholds.lower_pct,
            instrument,
        )
    }

    pub fn is_breach(
        &mut self,
        current: f64,
        previous: f64,
        upper_pct: f64,
        lower_pct: f64,
        instrument: Instrument,
    ) -> bool {
        if previous <= 0.0 {
            return true;
        }

        let (Some(curr), Some(prev), Some(up), Some(down)) = (
            to_decimal(current, PRICE_DP),
            to_decimal(previous, PRICE_DP),
            to_decimal(upper_pct.max(0.0), PCT_DP),
            to_decimal(lower_pct.max(0.0), PCT_DP),
        ) else {
            tracing::warn!(%instrument, current, previous, "value not representable as decimal");
            return false;
        };
        if prev.is_zero() {
            return true;
        }

        let upper_bound = prev * (Decimal::ONE + up / Decimal::ONE_HUNDRED);
        let lower_bound = prev * (Decimal::ONE - down / Decimal::ONE_HUNDRED);

        let increase_breach = curr >= upper_bound;
        let decrease_breach = curr <= lower_bound;

        match self.direction(instrument) {
            Direction::Up if increase_breach && curr < upper_bound * hysteresis_up() => {
                tracing::debug!(%instrument, %curr, %upper_bound, "inside upward hysteresis band");
                return false;
            }
            Direction::Down if decrease_breach && curr > lower_bound * hysteresis_down() => {
                tracing::debug!(%instrument, %curr, %lower_bound, "inside downward hysteresis band");
                return false;
            }
            _ => {}
        }

        if increase_breach {
            self.directions.insert(instrument, Direction::Up);
        } else if decrease_breach {
            self.directions.insert(instrument, Direction::Down);
        } else {
            let distance = ((curr - prev) / prev * Decimal::ONE_HUNDRED).abs();
            if distance >= reset_distance_pct() {
                self.directions.insert(instrument, Direction::None);
            }
        }

        increase_breach || decrease_breach
    }
}

/// Breach rule for the Tether 24h change, which is already a signed
/// percentage. No hysteresis is applied to it.
pub fn tether_change_breach(change_pct: f64, upper_pct: f64, lower_pct: f64) -> bool {
    let (Some(change), Some(up), Some(down)) = (
        to_decimal(change_pct, PCT_DP),
        to_decimal(upper_pct.max(0.0), PCT_DP),
        to_decimal(lower_pct.max(0.0), PCT_DP),
    ) else {
        return false;
    };
    change >= up || change <= -down
}

#[cfg(test)]
mod tests {
    use super::*;

    const I: Instrument = Instrument::UsdToman;

    #[test]
    fn no_baseline_always_announces() {
        let mut e = BreachEngine::new();
        for x in [0.0, 1.0, 99.5, 1e9] {
            assert!(e.is_breach(x, 0.0, 1.0, 2.0, I));
            assert!(e.is_breach(x, -3.0, 5.0, 5.0, I));
        }
    }

    #[test]
    fn exact_upper_boundary_triggers() {
        let mut e = BreachEngine::new();
        assert!(e.is_breach(101.0, 100.0, 1.0, 2.0, I));
        let mut e = BreachEngine::new();
        assert!(!e.is_breach(100.99, 100.0, 1.0, 2.0, I));
    }

    #[test]
    fn exact_lower_boundary_triggers() {
        let mut e = BreachEngine::new();
        assert!(e.is_breach(98.0, 100.0, 1.0, 2.0, I));
        assert_eq!(e.direction(I), Direction::Down);
        let mut e = BreachEngine::new();
        assert!(!e.is_breach(98.01, 100.0, 1.0, 2.0, I));
    }

    #[test]
    fn hysteresis_suppresses_retrigger_in_same_direction() {
        let mut e = BreachEngine::new();
        assert!(e.is_breach(101.0, 100.0, 1.0, 2.0, I));
        assert_eq!(e.direction(I), Direction::Up);

        assert!(!e.is_breach(101.1, 100.0, 1.0, 2.0, I));
        assert_eq!(e.direction(I), Direction::Up);

        assert!(e.is_breach(101.3, 100.0, 1.0, 2.0, I));
    }

    #[test]
    fn downward_hysteresis_is_symmetric() {
        let mut e = BreachEngine::new();
        assert!(e.is_breach(98.0, 100.0, 1.0, 2.0, I));
        // 98 * 0.998 = 97.804
        assert!(!e.is_breach(97.9, 100.0, 1.0, 2.0, I));
        assert!(e.is_breach(97.8, 100.0, 1.0, 2.0, I));
    }

    #[test]
    fn reversal_resets_direction() {
        let mut e = BreachEngine::new();
        assert!(e.is_breach(101.0, 100.0, 1.0, 2.0, I));

        // -0.6% from baseline: no breach, far enough to clear the memory.
        assert!(!e.is_breach(99.4, 100.0, 1.0, 2.0, I));
        assert_eq!(e.direction(I), Direction::None);

        assert!(e.is_breach(101.0, 100.0, 1.0, 2.0, I));
    }

    #[test]
    fn small_move_keeps_direction() {
        let mut e = BreachEngine::new();
        assert!(e.is_breach(101.0, 100.0, 1.0, 2.0, I));
        assert!(!e.is_breach(100.2, 100.0, 1.0, 2.0, I));
        assert_eq!(e.direction(I), Direction::Up);
    }

    #[test]
    fn opposite_direction_is_not_penalised() {
        let mut e = BreachEngine::new();
        assert!(e.is_breach(101.0, 100.0, 1.0, 2.0, I));
        assert!(e.is_breach(98.0, 100.0, 1.0, 2.0, I));
        assert_eq!(e.direction(I), Direction::Down);
    }

    #[test]
    fn instruments_are_independent() {
        let mut e = BreachEngine::new();
        assert!(e.is_breach(101.0, 100.0, 1.0, 2.0, Instrument::UsdToman));
        assert!(e.is_breach(101.0, 100.0, 1.0, 2.0, Instrument::EurToman));
        assert_eq!(e.direction(Instrument::Gold1gToman), Direction::None);
    }

    #[test]
    fn zero_threshold_triggers_on_any_rise() {
        let mut e = BreachEngine::new();
        assert!(e.is_breach(100.01, 100.0, 0.0, 2.0, I));
    }

    #[test]
    fn tether_rule_uses_signed_change() {
        assert!(tether_change_breach(1.0, 1.0, 2.0));
        assert!(tether_change_breach(-2.2, 1.0, 2.0));
        assert!(!tether_change_breach(-1.9, 1.0, 2.0));
        assert!(!tether_change_breach(0.04, 1.0, 2.0));
    }
}
