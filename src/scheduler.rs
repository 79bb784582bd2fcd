//! # Scheduler
//! One polling cycle: resolve composites → compare with the baseline →
//! maybe notify → maybe commit.
//!
//! Cycles are single-flight. The gate and the hysteresis memory live inside
//! the cycle lock, so holding the lock is what makes a cycle exclusive. A
//! trigger that finds the lock taken is skipped, never queued.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::baseline::BaselineManager;
use crate::config::{DailyReportSettings, ThresholdTable};
use crate::domain::{Baseline, Direction, Instrument, MarketUpdate};
use crate::fallback::{FallbackResolver, Resolution};
use crate::format;
use crate::gate::EligibilityGate;
use crate::hysteresis::{tether_change_breach, BreachEngine};
use crate::notify::{deliver, Notifier};
use crate::stats::StatsTracker;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("xrate_cycles_total", "Completed scheduler cycles by outcome.");
        describe_counter!(
            "xrate_cycles_skipped_total",
            "Triggers skipped because a cycle was still running."
        );
        describe_counter!("xrate_breaches_total", "Announced threshold breaches per instrument.");
        describe_counter!(
            "xrate_composite_unavailable_total",
            "Cycles where every queried source of a composite failed."
        );
        describe_counter!("xrate_notifications_total", "Notification deliveries by result.");
        describe_gauge!("xrate_last_cycle_ts", "Unix ts of the last finished cycle.");
    });
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "instruments", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Another cycle held the lock.
    Busy,
    /// Nothing due or everything failed; no side effects.
    NoData,
    /// Cold start: posted without deltas and set the baseline.
    Initial,
    /// At least one breach was announced and committed.
    Announced(Vec<Instrument>),
    /// No breach; nothing sent, baseline untouched.
    Quiet,
    /// Breach found but the send failed; baseline untouched.
    SendFailed,
}

impl CycleOutcome {
    fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Busy => "busy",
            CycleOutcome::NoData => "no_data",
            CycleOutcome::Initial => "initial",
            CycleOutcome::Announced(_) => "announced",
            CycleOutcome::Quiet => "quiet",
            CycleOutcome::SendFailed => "send_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DailyOutcome {
    Disabled,
    NotDue,
    SkippedWeekday,
    AlreadySent,
    Sent,
    Failed,
}

struct CycleState {
    gate: EligibilityGate,
    engine: BreachEngine,
}

/// Read-only view published after every cycle for the status endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleView {
    pub next_eligible: BTreeMap<String, DateTime<Utc>>,
    pub directions: BTreeMap<Instrument, Direction>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<CycleOutcome>,
}

pub struct Destinations {
    pub primary: String,
    /// Best-effort copy of every post.
    pub secondary: Option<String>,
}

pub struct Scheduler {
    resolvers: Vec<FallbackResolver>,
    thresholds: ThresholdTable,
    baseline: Arc<BaselineManager>,
    stats: Arc<StatsTracker>,
    notifier: Arc<dyn Notifier>,
    destinations: Destinations,
    interval: StdDuration,
    daily: DailyReportSettings,
    cycle: tokio::sync::Mutex<CycleState>,
    view: RwLock<CycleView>,
    last_daily: Mutex<Option<NaiveDate>>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolvers: Vec<FallbackResolver>,
        thresholds: ThresholdTable,
        baseline: Arc<BaselineManager>,
        stats: Arc<StatsTracker>,
        notifier: Arc<dyn Notifier>,
        destinations: Destinations,
        interval_minutes: u32,
        daily: DailyReportSettings,
    ) -> Self {
        ensure_metrics_described();
        Self {
            resolvers,
            thresholds,
            baseline,
            stats,
            notifier,
            destinations,
            interval: StdDuration::from_secs(u64::from(interval_minutes.max(1)) * 60),
            daily,
            cycle: tokio::sync::Mutex::new(CycleState {
                gate: EligibilityGate::new(),
                engine: BreachEngine::new(),
            }),
            view: RwLock::new(CycleView::default()),
            last_daily: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> StdDuration {
        self.interval
    }

    pub fn view(&self) -> CycleView {
        self.view.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn baseline(&self) -> &Arc<BaselineManager> {
        &self.baseline
    }

    pub fn stats(&self) -> &Arc<StatsTracker> {
        &self.stats
    }

    pub async fn run_cycle(&self) -> CycleOutcome {
        self.run_cycle_at(Utc::now()).await
    }

    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> CycleOutcome {
        let Ok(mut state) = self.cycle.try_lock() else {
            tracing::info!("previous cycle still running, skipping");
            counter!("xrate_cycles_skipped_total").increment(1);
            return CycleOutcome::Busy;
        };

        let outcome = self.cycle_locked(&mut state, now).await;

        {
            let mut view = self.view.write().unwrap_or_else(PoisonError::into_inner);
            view.next_eligible = state.gate.snapshot();
            view.directions = state.engine.directions().iter().map(|(i, d)| (*i, *d)).collect();
            view.last_cycle_at = Some(now);
            view.last_outcome = Some(outcome.clone());
        }
        counter!("xrate_cycles_total", "outcome" => outcome.label()).increment(1);
        gauge!("xrate_last_cycle_ts").set(now.timestamp() as f64);
        outcome
    }

    async fn cycle_locked(&self, state: &mut CycleState, now: DateTime<Utc>) -> CycleOutcome {
        let mut update = MarketUpdate::default();
        for resolver in &self.resolvers {
            match resolver.resolve_at(&mut state.gate, now).await {
                Resolution::Ready(reading) => update.push(reading),
                Resolution::NotDue => {}
                Resolution::AllSourcesUnavailable { failures } => {
                    tracing::warn!(composite = resolver.name(), failures = ?failures, "all sources unavailable");
                    counter!("xrate_composite_unavailable_total", "composite" => resolver.name().to_string())
                        .increment(1);
                }
            }
        }

        if update.is_empty() {
            tracing::info!("no data this cycle");
            return CycleOutcome::NoData;
        }

        let values = update.values();
        let providers = update.sources();

        let Some(baseline) = self.baseline.get_current() else {
            return self.post_initial(&values, providers, now).await;
        };

        let before = state.engine.clone();
        let breached = self.evaluate(&mut state.engine, &values, &baseline);
        if breached.is_empty() {
            tracing::debug!("no threshold breached");
            return CycleOutcome::Quiet;
        }

        let elapsed = self.baseline.get_elapsed_seconds_at(now);
        let text = format::breach_update(&values, &baseline, &breached, elapsed, &providers);

        match self.send_all(&text).await {
            Ok(()) => {
                self.baseline.update(&values, providers.clone(), now);
                self.stats.record_post_at(&providers, false, now);
                for i in &breached {
                    counter!("xrate_breaches_total", "instrument" => i.key()).increment(1);
                }
                tracing::info!(breached = ?breached, providers = ?providers, "announced");
                CycleOutcome::Announced(breached)
            }
            Err(e) => {
                // The channel never saw this move, so it must still count as new.
                state.engine = before;
                self.stats.record_error_at(&format!("breach post failed: {e}"), now);
                CycleOutcome::SendFailed
            }
        }
    }

    async fn post_initial(
        &self,
        values: &BTreeMap<Instrument, f64>,
        providers: Vec<String>,
        now: DateTime<Utc>,
    ) -> CycleOutcome {
        tracing::info!("first run, posting initial market data");
        let text = format::initial_report(values, &providers);
        match self.send_all(&text).await {
            Ok(()) => self.stats.record_post_at(&providers, false, now),
            Err(e) => self.stats.record_error_at(&format!("initial post failed: {e}"), now),
        }
        self.baseline.update(values, providers, now);
        CycleOutcome::Initial
    }

    /// Instruments whose new value breaches against `baseline`.
    fn evaluate(
        &self,
        engine: &mut BreachEngine,
        values: &BTreeMap<Instrument, f64>,
        baseline: &Baseline,
    ) -> Vec<Instrument> {
        let mut breached = Vec::new();
        for (&instrument, &current) in values {
            let t = self.thresholds.for_instrument(instrument);
            let hit = match instrument {
                Instrument::Tether24hChangePct => continue,
                Instrument::TetherToman => {
                    if baseline.value(Instrument::TetherToman) <= 0.0 {
                        true
                    } else {
                        values
                            .get(&Instrument::Tether24hChangePct)
                            .is_some_and(|ch| tether_change_breach(*ch, t.upper_pct, t.lower_pct))
                    }
                }
                _ => engine.is_breach_with(current, baseline.value(instrument), t, instrument),
            };
            if hit {
                breached.push(instrument);
            }
        }
        breached
    }

    /// Primary destination must succeed; the secondary one is best-effort.
    async fn send_all(&self, text: &str) -> Result<(), crate::error::NotifyError> {
        deliver(self.notifier.as_ref(), &self.destinations.primary, text).await?;
        if let Some(secondary) = &self.destinations.secondary {
            if let Err(e) = deliver(self.notifier.as_ref(), secondary, text).await {
                tracing::warn!(error = %e, destination = %secondary, "secondary delivery failed");
            }
        }
        Ok(())
    }

    pub async fn run_daily_report_at(&self, now: DateTime<Utc>) -> DailyOutcome {
        let Some(hour) = self.daily.hour_utc else {
            return DailyOutcome::Disabled;
        };
        if now.hour() != hour {
            return DailyOutcome::NotDue;
        }
        if self.daily.skip_days.contains(&now.weekday()) {
            return DailyOutcome::SkippedWeekday;
        }
        let today = now.date_naive();
        if *self.last_daily.lock().unwrap_or_else(PoisonError::into_inner) == Some(today) {
            return DailyOutcome::AlreadySent;
        }

        let baseline = self.baseline.get_current();
        let text = format::daily_report(baseline.as_ref(), self.baseline.get_elapsed_seconds_at(now));
        match self.send_all(&text).await {
            Ok(()) => {
                // marked only once delivered, so a failed report is retried on the next tick
                *self.last_daily.lock().unwrap_or_else(PoisonError::into_inner) = Some(today);
                let providers = baseline.map(|b| b.sources).unwrap_or_default();
                self.stats.record_post_at(&providers, false, now);
                tracing::info!("daily report posted");
                DailyOutcome::Sent
            }
            Err(e) => {
                self.stats.record_error_at(&format!("daily report failed: {e}"), now);
                DailyOutcome::Failed
            }
        }
    }

    /// Background loop: a cycle on every post-interval tick (each in its own
    /// task, so a slow cycle makes the next trigger hit `Busy`), plus a
    /// once-a-minute check for the daily report.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut cycle_tick = time::interval(self.interval);
            cycle_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut daily_tick = time::interval(StdDuration::from_secs(60));
            daily_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(interval_secs = self.interval.as_secs(), "scheduler started");
            loop {
                tokio::select! {
                    _ = cycle_tick.tick() => {
                        let me = Arc::clone(&self);
                        tokio::spawn(async move {
                            let outcome = me.run_cycle().await;
                            tracing::debug!(outcome = outcome.label(), "cycle finished");
                        });
                    }
                    _ = daily_tick.tick() => {
                        if self.daily.hour_utc.is_some() {
                            self.run_daily_report_at(Utc::now()).await;
                        }
                    }
                }
            }
        })
    }
}
