//! # HTML crawlers
//! Regex-based table scanning for the two rate websites.
//!
//! Both sites publish a plain `<table>` with one row per instrument: the
//! label in the first cell, buy/sell prices after it. Numbers may use
//! thousands separators and Persian digits.

pub mod alanchand;
pub mod bonbast;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::Reading;
use crate::error::SourceError;
use crate::sources::http::HttpFetcher;
use crate::sources::RateSource;

static RE_ROW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").expect("row regex"));
static RE_CELL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<t[dh]\b[^>]*>(.*?)</t[dh]>").expect("cell regex"));
static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));
static RE_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("digits regex"));

type ParseFn = fn(&str, DateTime<Utc>) -> Result<Reading, SourceError>;

/// Cell text: tags stripped, entities decoded, whitespace collapsed.
pub fn cell_text(raw: &str) -> String {
    let no_tags = RE_TAGS.replace_all(raw, " ");
    let decoded = html_escape::decode_html_entities(&no_tags);
    RE_WS.replace_all(decoded.trim(), " ").to_string()
}

/// Every `<tr>` in the document as a list of cell texts.
pub fn table_rows(html: &str) -> Vec<Vec<String>> {
    RE_ROW
        .captures_iter(html)
        .map(|row| {
            RE_CELL
                .captures_iter(&row[1])
                .map(|c| cell_text(&c[1]))
                .collect()
        })
        .collect()
}

fn ascii_digit(c: char) -> char {
    match c {
        '\u{06F0}'..='\u{06F9}' => char::from(b'0' + (c as u32 - 0x06F0) as u8),
        '\u{0660}'..='\u{0669}' => char::from(b'0' + (c as u32 - 0x0660) as u8),
        other => other,
    }
}

/// First integer in `text` after dropping separators (`,` `،` `٬` spaces)
/// and mapping Persian/Arabic-Indic digits. Zero counts as no price.
pub fn parse_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, ',' | '،' | '٬') && !c.is_whitespace())
        .map(ascii_digit)
        .collect();
    let digits = RE_DIGITS.find(&cleaned)?;
    let value: u64 = digits.as_str().parse().ok()?;
    (value > 0).then_some(value as f64)
}

/// A rate website scraped with a site-specific row parser.
pub struct HtmlCrawler {
    name: &'static str,
    url: String,
    http: HttpFetcher,
    parse: ParseFn,
}

impl HtmlCrawler {
    pub fn bonbast(http: HttpFetcher, url: impl Into<String>) -> Self {
        Self {
            name: bonbast::NAME,
            url: url.into(),
            http,
            parse: bonbast::parse_bonbast,
        }
    }

    pub fn alanchand(http: HttpFetcher, url: impl Into<String>) -> Self {
        Self {
            name: alanchand::NAME,
            url: url.into(),
            http,
            parse: alanchand::parse_alanchand,
        }
    }
}

#[async_trait]
impl RateSource for HtmlCrawler {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch_fresh(&self) -> Result<Reading, SourceError> {
        tracing::info!(source = self.name, url = %self.url, "crawling");
        let html = self.http.get_text(self.name, &self.url).await?;
        (self.parse)(&html, Utc::now())
    }
}
