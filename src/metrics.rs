use anyhow::Context;
use axum::{routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::Settings;

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and publish the static config gauges.
    pub fn init(settings: &Settings) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        gauge!("xrate_post_interval_minutes").set(f64::from(settings.post_interval_minutes()));
        for (source, ttl) in settings.ttl.entries() {
            gauge!("xrate_source_ttl_minutes", "source" => source).set(f64::from(ttl));
        }

        Ok(Self { handle })
    }

    /// Handle to a recorder that is not installed globally. Renders an empty
    /// exposition; enough for router tests.
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: recorder.handle(),
        }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
