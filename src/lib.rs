// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod baseline;
pub mod config;
pub mod domain;
pub mod error;
pub mod fallback;
pub mod format;
pub mod gate;
pub mod hysteresis;
pub mod metrics;
pub mod notify;
pub mod persistence;
pub mod scheduler;
pub mod sources;
pub mod stats;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::config::Settings;
pub use crate::domain::{Baseline, Instrument, MarketUpdate, Reading};
pub use crate::scheduler::{CycleOutcome, Scheduler};
