//! Read-only status server: health, baseline/gate view, stats, Prometheus.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::domain::{Baseline, Direction, Instrument};
use crate::metrics::Metrics;
use crate::scheduler::{CycleOutcome, Scheduler};
use crate::stats::StatsSummary;

#[derive(Clone)]
pub struct AppState {
    scheduler: Arc<Scheduler>,
}

#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub now: DateTime<Utc>,
    pub post_interval_minutes: u64,
    pub baseline: Option<Baseline>,
    pub elapsed_seconds: i64,
    pub next_eligible: BTreeMap<String, DateTime<Utc>>,
    pub directions: BTreeMap<Instrument, Direction>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<CycleOutcome>,
}

pub fn status_at(scheduler: &Scheduler, now: DateTime<Utc>) -> StatusSnapshot {
    let view = scheduler.view();
    StatusSnapshot {
        now,
        post_interval_minutes: scheduler.interval().as_secs() / 60,
        baseline: scheduler.baseline().get_current(),
        elapsed_seconds: scheduler.baseline().get_elapsed_seconds_at(now),
        next_eligible: view.next_eligible,
        directions: view.directions,
        last_cycle_at: view.last_cycle_at,
        last_outcome: view.last_outcome,
    }
}

pub fn router(scheduler: Arc<Scheduler>, metrics: &Metrics) -> Router {
    let state = AppState { scheduler };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status))
        .route("/stats", get(stats))
        .with_state(state)
        .merge(metrics.router())
        .layer(CorsLayer::very_permissive())
}

async fn status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(status_at(&state.scheduler, Utc::now()))
}

async fn stats(State(state): State<AppState>) -> Json<StatsSummary> {
    Json(state.scheduler.stats().summary())
}
