//! xrate: binary entrypoint
//! Loads settings, wires sources → scheduler → notifier, runs the polling loop
//! and serves the read-only status endpoints until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use xrate::baseline::BaselineManager;
use xrate::config::Settings;
use xrate::metrics::Metrics;
use xrate::notify::{LogNotifier, Notifier, TelegramNotifier};
use xrate::persistence::FileStore;
use xrate::scheduler::{Destinations, Scheduler};
use xrate::sources::{build_resolvers, http::HttpFetcher};
use xrate::stats::StatsTracker;

/// `RUST_LOG` filter (default `xrate=info,warn`); `LOG_FORMAT=json` switches
/// to one JSON object per line.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("xrate=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading settings")?;
    init_tracing();

    let metrics = Metrics::init(&settings)?;

    let http = HttpFetcher::new(settings.http_timeout_secs)?;
    let resolvers = build_resolvers(&settings, &http);
    if resolvers.is_empty() {
        anyhow::bail!("no rate sources configured");
    }

    let baseline = Arc::new(BaselineManager::load(Arc::new(FileStore::new(&settings.state_file))));
    let stats = Arc::new(StatsTracker::load(&settings.stats_file));

    let (notifier, destinations): (Arc<dyn Notifier>, Destinations) =
        match (&settings.telegram.bot_token, &settings.telegram.channel_id) {
            (Some(token), Some(channel)) => (
                Arc::new(TelegramNotifier::new(token.clone()).with_timeout(settings.http_timeout_secs)),
                Destinations {
                    primary: channel.clone(),
                    secondary: settings.telegram.test_channel_id.clone(),
                },
            ),
            _ => {
                tracing::warn!("BOT_TOKEN not set, posts go to the log only");
                (
                    Arc::new(LogNotifier),
                    Destinations {
                        primary: "log".into(),
                        secondary: None,
                    },
                )
            }
        };

    let scheduler = Arc::new(Scheduler::new(
        resolvers,
        settings.thresholds,
        baseline,
        stats,
        notifier,
        destinations,
        settings.post_interval_minutes(),
        settings.daily_report.clone(),
    ));
    let ticker = Arc::clone(&scheduler).spawn();

    let app = xrate::router(scheduler, &metrics);
    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("binding {}", settings.bind_addr))?;
    tracing::info!(addr = %settings.bind_addr, "status server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .context("status server")?;

    ticker.abort();
    Ok(())
}
