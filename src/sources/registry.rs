//! Builds the composite fallback chains from settings.
//!
//! Each adapter type gets exactly one `TtlCache`, created here and handed to
//! every `CachedSource` wrapping that adapter.

use std::sync::Arc;

use crate::config::Settings;
use crate::domain::Instrument;
use crate::fallback::FallbackResolver;
use crate::sources::crawlers::HtmlCrawler;
use crate::sources::http::HttpFetcher;
use crate::sources::providers::{BrsApiSource, FastForexSource, NavasanSource, WallexSource};
use crate::sources::{CachedSource, RateSource, TtlCache};

pub const MARKET: &str = "market";
pub const EUR_USD: &str = "eurusd";
pub const TETHER: &str = "tether";

pub const MARKET_INSTRUMENTS: [Instrument; 3] =
    [Instrument::UsdToman, Instrument::EurToman, Instrument::Gold1gToman];
pub const EUR_USD_INSTRUMENTS: [Instrument; 1] = [Instrument::EurUsdRate];
pub const TETHER_INSTRUMENTS: [Instrument; 2] = [Instrument::TetherToman, Instrument::Tether24hChangePct];

fn cached(inner: Arc<dyn RateSource>, cache: &TtlCache, ttl_minutes: u32) -> Arc<CachedSource> {
    Arc::new(CachedSource::new(inner, cache.clone(), ttl_minutes))
}

/// Market {USD, EUR, gold}: Bonbast → AlanChand → BRS → Navasan.
/// EUR/USD: BRS (derived) → FastForex. Tether: Wallex.
/// Keyed APIs without a key are left out; an empty chain is not registered.
pub fn build_resolvers(settings: &Settings, http: &HttpFetcher) -> Vec<FallbackResolver> {
    let ttl = settings.ttl;
    let keys = &settings.keys;

    let brs: Option<(Arc<dyn RateSource>, TtlCache)> = keys
        .brsapi
        .as_deref()
        .map(|k| (Arc::new(BrsApiSource::new(http.clone(), k)) as Arc<dyn RateSource>, TtlCache::new()));

    let mut market = vec![
        cached(
            Arc::new(HtmlCrawler::bonbast(http.clone(), settings.crawler1_url.clone())),
            &TtlCache::new(),
            ttl.bonbast,
        ),
        cached(
            Arc::new(HtmlCrawler::alanchand(http.clone(), settings.crawler2_url.clone())),
            &TtlCache::new(),
            ttl.alanchand,
        ),
    ];
    if let Some((inner, cache)) = &brs {
        market.push(cached(inner.clone(), cache, ttl.brsapi));
    }
    if let Some(k) = keys.navasan.as_deref() {
        market.push(cached(Arc::new(NavasanSource::new(http.clone(), k)), &TtlCache::new(), ttl.navasan));
    }

    let mut eur_usd = Vec::new();
    if let Some((inner, cache)) = &brs {
        eur_usd.push(Arc::new(
            CachedSource::new(inner.clone(), cache.clone(), ttl.brsapi).with_id("brsapi_fx"),
        ));
    }
    if let Some(k) = keys.fastforex.as_deref() {
        eur_usd.push(cached(Arc::new(FastForexSource::new(http.clone(), k)), &TtlCache::new(), ttl.fastforex));
    }

    let tether = vec![cached(Arc::new(WallexSource::new(http.clone())), &TtlCache::new(), ttl.wallex)];

    let resolvers: Vec<FallbackResolver> = [
        (MARKET, &MARKET_INSTRUMENTS[..], market),
        (EUR_USD, &EUR_USD_INSTRUMENTS[..], eur_usd),
        (TETHER, &TETHER_INSTRUMENTS[..], tether),
    ]
    .into_iter()
    .filter_map(|(name, required, chain)| {
        if chain.is_empty() {
            tracing::warn!(composite = name, "no configured source, composite disabled");
            None
        } else {
            Some(FallbackResolver::new(name, required, chain))
        }
    })
    .collect();

    for r in &resolvers {
        tracing::info!(composite = r.name(), chain = ?r.source_ids(), "fallback chain");
    }
    resolvers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(resolvers: &[FallbackResolver], name: &str) -> Vec<String> {
        resolvers
            .iter()
            .find(|r| r.name() == name)
            .map(|r| r.source_ids())
            .unwrap_or_default()
    }

    #[test]
    fn chains_follow_priority_and_keys() {
        let mut s = Settings::default();
        s.keys.brsapi = Some("brs-key".into());
        s.keys.navasan = Some("nav-key".into());
        s.keys.fastforex = Some("ff-key".into());
        let http = HttpFetcher::new(5).unwrap();

        let r = build_resolvers(&s, &http);
        assert_eq!(ids(&r, MARKET), vec!["bonbast", "alanchand", "brsapi", "navasan"]);
        assert_eq!(ids(&r, EUR_USD), vec!["brsapi_fx", "fastforex"]);
        assert_eq!(ids(&r, TETHER), vec!["wallex"]);
    }

    #[test]
    fn keyless_sources_are_not_registered() {
        let s = Settings::default();
        let http = HttpFetcher::new(5).unwrap();
        let r = build_resolvers(&s, &http);
        assert_eq!(ids(&r, MARKET), vec!["bonbast", "alanchand"]);
        assert!(r.iter().all(|x| x.name() != EUR_USD));
    }
}
