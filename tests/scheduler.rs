// tests/scheduler.rs
//
// End-to-end cycles through the scheduler with in-process sources and an
// in-memory outbox instead of the network.
//
// Covered:
// - cold start posts without deltas and sets the baseline
// - breach announces with a signed percentage and commits
// - sub-threshold move stays quiet
// - every source failing leaves everything untouched
// - a dead source's cached value is never replayed as a move
// - failed send keeps the baseline and the hysteresis memory
// - overlapping trigger is skipped
// - daily report cadence, retried within the hour after a failed send

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc, Weekday};
use tokio::sync::Notify;

use xrate::baseline::BaselineManager;
use xrate::config::{DailyReportSettings, ThresholdTable};
use xrate::domain::{Instrument, Reading};
use xrate::error::{NotifyError, SourceError};
use xrate::fallback::FallbackResolver;
use xrate::notify::Notifier;
use xrate::persistence::{FileStore, LoadOutcome, StateStore};
use xrate::scheduler::{CycleOutcome, DailyOutcome, Destinations, Scheduler};
use xrate::sources::{CachedSource, RateSource, TtlCache};
use xrate::stats::StatsTracker;

const TTL: u32 = 15;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
}

type Reply = Result<Vec<(Instrument, f64)>, ()>;

/// Returns queued replies in order; the last one repeats.
struct Scripted {
    name: &'static str,
    replies: Mutex<VecDeque<Reply>>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(name: &'static str, replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            name,
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl RateSource for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch_fresh(&self) -> Result<Reading, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = {
            let mut q = self.replies.lock().unwrap();
            if q.len() > 1 {
                q.pop_front().unwrap()
            } else {
                q.front().cloned().unwrap()
            }
        };
        match reply {
            Ok(pairs) => Ok(pairs
                .into_iter()
                .fold(Reading::new(self.name, t0()), |r, (i, v)| r.with_value(i, v))),
            Err(()) => Err(SourceError::Status {
                source_id: self.name.to_string(),
                status: 503,
            }),
        }
    }
}

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl Outbox {
    fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }
}

#[async_trait]
impl Notifier for Outbox {
    fn name(&self) -> &str {
        "outbox"
    }

    async fn send(&self, destination: &str, text: &str) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Fatal("chat not found".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), text.to_string()));
        Ok(())
    }
}

fn cached(src: Arc<dyn RateSource>) -> Arc<CachedSource> {
    cached_every(src, TTL)
}

fn cached_every(src: Arc<dyn RateSource>, ttl_minutes: u32) -> Arc<CachedSource> {
    Arc::new(CachedSource::new(src, TtlCache::new(), ttl_minutes))
}

struct Harness {
    scheduler: Arc<Scheduler>,
    outbox: Arc<Outbox>,
    baseline: Arc<BaselineManager>,
    _dir: tempfile::TempDir,
}

fn harness(resolvers: Vec<FallbackResolver>, seed: Option<&[(Instrument, f64)]>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path().join("last_state.json")));
    let baseline = Arc::new(BaselineManager::load(store));
    if let Some(pairs) = seed {
        let values = pairs.iter().copied().collect();
        baseline.update(&values, vec!["seed".into()], t0() - Duration::hours(1));
    }
    let outbox = Arc::new(Outbox::default());
    let scheduler = Arc::new(Scheduler::new(
        resolvers,
        ThresholdTable::default(),
        Arc::clone(&baseline),
        Arc::new(StatsTracker::in_memory()),
        outbox.clone(),
        Destinations {
            primary: "@rates".into(),
            secondary: None,
        },
        TTL,
        DailyReportSettings {
            hour_utc: Some(9),
            skip_days: vec![Weekday::Thu, Weekday::Fri],
        },
    ));
    Harness {
        scheduler,
        outbox,
        baseline,
        _dir: dir,
    }
}

fn usd_only(src: Arc<dyn RateSource>) -> FallbackResolver {
    FallbackResolver::new("usd", &[Instrument::UsdToman], vec![cached(src)])
}

#[tokio::test]
async fn cold_start_posts_plain_values_and_sets_baseline() {
    let src = Scripted::new(
        "bonbast",
        vec![Ok(vec![
            (Instrument::UsdToman, 108_400.0),
            (Instrument::EurToman, 126_000.0),
            (Instrument::Gold1gToman, 10_812_360.0),
        ])],
    );
    let market = FallbackResolver::new(
        "market",
        &[Instrument::UsdToman, Instrument::EurToman, Instrument::Gold1gToman],
        vec![cached(src)],
    );
    let h = harness(vec![market], None);

    assert_eq!(h.scheduler.run_cycle_at(t0()).await, CycleOutcome::Initial);

    let msgs = h.outbox.messages();
    assert_eq!(msgs.len(), 1);
    assert!(!msgs[0].contains('%'), "initial post must not carry deltas: {}", msgs[0]);
    assert!(msgs[0].contains("108.4 KToman"));

    let b = h.baseline.get_current().expect("baseline set");
    assert_eq!(b.value(Instrument::UsdToman), 108_400.0);
    assert_eq!(b.value(Instrument::EurToman), 126_000.0);
    assert_eq!(b.value(Instrument::Gold1gToman), 10_812_360.0);
    assert_eq!(b.timestamp, t0());
    assert_eq!(b.sources, vec!["bonbast".to_string()]);
}

#[tokio::test]
async fn two_percent_rise_is_announced_and_committed() {
    let src = Scripted::new("bonbast", vec![Ok(vec![(Instrument::UsdToman, 102_000.0)])]);
    let h = harness(vec![usd_only(src)], Some(&[(Instrument::UsdToman, 100_000.0)]));

    let outcome = h.scheduler.run_cycle_at(t0()).await;
    assert_eq!(outcome, CycleOutcome::Announced(vec![Instrument::UsdToman]));

    let msgs = h.outbox.messages();
    assert_eq!(msgs.len(), 1);
    assert!(msgs[0].contains("+2.0% 📈"), "{}", msgs[0]);
    assert!(msgs[0].contains("Time spent from previous announcement: 1h:00min"));
    assert_eq!(h.baseline.get_current().unwrap().value(Instrument::UsdToman), 102_000.0);
}

#[tokio::test]
async fn small_dip_stays_quiet_and_keeps_baseline() {
    let src = Scripted::new("bonbast", vec![Ok(vec![(Instrument::UsdToman, 99_500.0)])]);
    let h = harness(vec![usd_only(src)], Some(&[(Instrument::UsdToman, 100_000.0)]));
    let before = h.baseline.get_current().unwrap();

    assert_eq!(h.scheduler.run_cycle_at(t0()).await, CycleOutcome::Quiet);
    assert!(h.outbox.messages().is_empty());
    assert_eq!(h.baseline.get_current().unwrap(), before);
}

#[tokio::test]
async fn every_source_failing_changes_nothing() {
    let primary = Scripted::new("bonbast", vec![Err(())]);
    let fallback = Scripted::new("alanchand", vec![Err(())]);
    let chain = FallbackResolver::new(
        "usd",
        &[Instrument::UsdToman],
        vec![cached(primary.clone()), cached(fallback.clone())],
    );
    let h = harness(vec![chain], Some(&[(Instrument::UsdToman, 100_000.0)]));
    let before = h.baseline.get_current().unwrap();

    assert_eq!(h.scheduler.run_cycle_at(t0()).await, CycleOutcome::NoData);
    assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    assert!(h.outbox.messages().is_empty());
    assert_eq!(h.baseline.get_current().unwrap(), before);
    assert_eq!(h.scheduler.stats().summary_at(t0()).posts_24h, 0);
}

#[tokio::test]
async fn failed_send_keeps_baseline_and_retries_next_cycle() {
    let src = Scripted::new(
        "bonbast",
        vec![
            Ok(vec![(Instrument::UsdToman, 101_000.0)]),
            // inside the 0.2% band above 101_000: only passes if the failed
            // cycle left no remembered direction behind
            Ok(vec![(Instrument::UsdToman, 101_100.0)]),
        ],
    );
    let h = harness(vec![usd_only(src)], Some(&[(Instrument::UsdToman, 100_000.0)]));
    let before = h.baseline.get_current().unwrap();

    h.outbox.failing.store(true, Ordering::SeqCst);
    assert_eq!(h.scheduler.run_cycle_at(t0()).await, CycleOutcome::SendFailed);
    assert_eq!(h.baseline.get_current().unwrap(), before);
    assert!(h.scheduler.view().directions.is_empty());
    assert_eq!(h.scheduler.stats().summary_at(t0()).errors_24h, 1);

    h.outbox.failing.store(false, Ordering::SeqCst);
    let next = t0() + Duration::minutes(i64::from(TTL));
    assert_eq!(
        h.scheduler.run_cycle_at(next).await,
        CycleOutcome::Announced(vec![Instrument::UsdToman])
    );
    assert_eq!(h.baseline.get_current().unwrap().value(Instrument::UsdToman), 101_100.0);
}

#[tokio::test]
async fn dead_primary_falls_through_instead_of_replaying_its_cache() {
    let primary = Scripted::new(
        "bonbast",
        vec![Ok(vec![(Instrument::UsdToman, 100_000.0)]), Err(())],
    );
    let secondary = Scripted::new("brsapi", vec![Ok(vec![(Instrument::UsdToman, 103_000.0)])]);
    let chain = FallbackResolver::new(
        "usd",
        &[Instrument::UsdToman],
        vec![cached_every(primary.clone(), 30), cached_every(secondary.clone(), 15)],
    );
    let h = harness(vec![chain], None);

    assert_eq!(h.scheduler.run_cycle_at(t0()).await, CycleOutcome::Initial);
    // primary still cooling down, secondary reports the move
    assert_eq!(
        h.scheduler.run_cycle_at(t0() + Duration::minutes(15)).await,
        CycleOutcome::Announced(vec![Instrument::UsdToman])
    );
    assert_eq!(h.baseline.get_current().unwrap().value(Instrument::UsdToman), 103_000.0);

    // primary is due again but its refresh fails: its 30-minute-old value
    // must not be announced as a drop back to 100_000
    assert_eq!(
        h.scheduler.run_cycle_at(t0() + Duration::minutes(30)).await,
        CycleOutcome::Quiet
    );
    assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
    assert_eq!(secondary.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.baseline.get_current().unwrap().value(Instrument::UsdToman), 103_000.0);
    assert_eq!(h.outbox.messages().len(), 2);
}

#[tokio::test]
async fn gated_sources_are_not_queried_again_before_ttl() {
    let src = Scripted::new("bonbast", vec![Ok(vec![(Instrument::UsdToman, 100_100.0)])]);
    let h = harness(vec![usd_only(src.clone())], Some(&[(Instrument::UsdToman, 100_000.0)]));

    assert_eq!(h.scheduler.run_cycle_at(t0()).await, CycleOutcome::Quiet);
    assert_eq!(
        h.scheduler.run_cycle_at(t0() + Duration::minutes(5)).await,
        CycleOutcome::NoData
    );
    assert_eq!(src.calls.load(Ordering::SeqCst), 1);

    let view = h.scheduler.view();
    assert_eq!(
        view.next_eligible.get("bonbast"),
        Some(&(t0() + Duration::minutes(i64::from(TTL))))
    );
}

#[tokio::test]
async fn tether_breaches_on_reported_24h_change() {
    let src = Scripted::new(
        "wallex",
        vec![
            Ok(vec![
                (Instrument::TetherToman, 98_500.0),
                (Instrument::Tether24hChangePct, 0.3),
            ]),
            Ok(vec![
                (Instrument::TetherToman, 99_900.0),
                (Instrument::Tether24hChangePct, 1.4),
            ]),
        ],
    );
    let chain = FallbackResolver::new(
        "tether",
        &[Instrument::TetherToman, Instrument::Tether24hChangePct],
        vec![cached(src)],
    );
    let h = harness(vec![chain], Some(&[(Instrument::TetherToman, 98_000.0)]));

    assert_eq!(h.scheduler.run_cycle_at(t0()).await, CycleOutcome::Quiet);
    let next = t0() + Duration::minutes(i64::from(TTL));
    assert_eq!(
        h.scheduler.run_cycle_at(next).await,
        CycleOutcome::Announced(vec![Instrument::TetherToman])
    );
    let msgs = h.outbox.messages();
    assert!(msgs[0].contains("+1.40% 📈 (24h)"), "{}", msgs[0]);
}

struct Blocking {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl RateSource for Blocking {
    fn name(&self) -> &str {
        "slow"
    }

    async fn fetch_fresh(&self) -> Result<Reading, SourceError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(Reading::new("slow", t0()).with_value(Instrument::UsdToman, 100_000.0))
    }
}

#[tokio::test]
async fn overlapping_trigger_is_skipped() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let src = Arc::new(Blocking {
        entered: entered.clone(),
        release: release.clone(),
    });
    let h = harness(vec![usd_only(src)], None);

    let running = {
        let s = Arc::clone(&h.scheduler);
        tokio::spawn(async move { s.run_cycle_at(t0()).await })
    };
    entered.notified().await;

    assert_eq!(h.scheduler.run_cycle_at(t0()).await, CycleOutcome::Busy);

    release.notify_one();
    assert_eq!(running.await.unwrap(), CycleOutcome::Initial);
    assert_eq!(h.outbox.messages().len(), 1);
}

#[tokio::test]
async fn daily_report_once_per_day_and_never_on_skip_days() {
    let src = Scripted::new("bonbast", vec![Ok(vec![(Instrument::UsdToman, 100_000.0)])]);
    let h = harness(vec![usd_only(src)], Some(&[(Instrument::UsdToman, 100_000.0)]));
    let before = h.baseline.get_current().unwrap();

    // 2025-06-02 is a Monday
    assert_eq!(
        h.scheduler.run_daily_report_at(t0() - Duration::hours(1)).await,
        DailyOutcome::NotDue
    );
    assert_eq!(h.scheduler.run_daily_report_at(t0()).await, DailyOutcome::Sent);
    assert_eq!(
        h.scheduler.run_daily_report_at(t0() + Duration::minutes(1)).await,
        DailyOutcome::AlreadySent
    );
    assert_eq!(
        h.scheduler.run_daily_report_at(t0() + Duration::days(3)).await,
        DailyOutcome::SkippedWeekday
    );

    let msgs = h.outbox.messages();
    assert_eq!(msgs.len(), 1);
    assert!(msgs[0].starts_with("<b>Daily price report:</b>"));
    assert_eq!(h.baseline.get_current().unwrap(), before);
}

#[tokio::test]
async fn failed_daily_report_is_retried_within_the_hour() {
    let src = Scripted::new("bonbast", vec![Ok(vec![(Instrument::UsdToman, 100_000.0)])]);
    let h = harness(vec![usd_only(src)], Some(&[(Instrument::UsdToman, 100_000.0)]));

    h.outbox.failing.store(true, Ordering::SeqCst);
    assert_eq!(h.scheduler.run_daily_report_at(t0()).await, DailyOutcome::Failed);
    assert!(h.outbox.messages().is_empty());
    assert_eq!(h.scheduler.stats().summary_at(t0()).errors_24h, 1);

    h.outbox.failing.store(false, Ordering::SeqCst);
    assert_eq!(
        h.scheduler.run_daily_report_at(t0() + Duration::minutes(1)).await,
        DailyOutcome::Sent
    );
    assert_eq!(
        h.scheduler.run_daily_report_at(t0() + Duration::minutes(2)).await,
        DailyOutcome::AlreadySent
    );
    assert_eq!(h.outbox.messages().len(), 1);
}

#[tokio::test]
async fn committed_baseline_reaches_disk() {
    let src = Scripted::new("bonbast", vec![Ok(vec![(Instrument::UsdToman, 108_400.0)])]);
    let h = harness(vec![usd_only(src)], None);
    h.scheduler.run_cycle_at(t0()).await;

    let store = FileStore::new(h._dir.path().join("last_state.json"));
    match store.load() {
        LoadOutcome::Loaded(raw) => {
            assert_eq!(raw.usd_toman, 108_400.0);
            assert_eq!(raw.ts, Some(t0()));
        }
        other => panic!("unexpected {other:?}"),
    }
}
