// Core types shared across the intelligence pipeline

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single dated price point for a commodity.
///
/// Series are ordered by date and append-only from this crate's point of
/// view; loading and corrections happen upstream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceObservation {
    pub date: NaiveDate,
    pub price: f64,
}

impl PriceObservation {
    pub fn new(date: NaiveDate, price: f64) -> Self {
        Self { date, price }
    }
}

/// Analysis horizon for a provider query; part of the persistent cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeWindow {
    #[serde(rename = "1 week")]
    Week,
    #[serde(rename = "1 month")]
    Month,
}

impl TimeWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::Week => "1 week",
            TimeWindow::Month => "1 month",
        }
    }

    /// Parse from the wire/config representation ("1 week", "1 month")
    pub fn parse(s: &str) -> Option<TimeWindow> {
        match s.trim() {
            "1 week" | "week" | "1w" => Some(TimeWindow::Week),
            "1 month" | "month" | "1m" => Some(TimeWindow::Month),
            _ => None,
        }
    }

    pub fn all() -> Vec<TimeWindow> {
        vec![TimeWindow::Week, TimeWindow::Month]
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Market direction reported by the intelligence provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Stable,
    Unknown,
}

impl Trend {
    pub fn from_str_lossy(s: &str) -> Trend {
        match s.trim().to_lowercase().as_str() {
            "bullish" => Trend::Bullish,
            "bearish" => Trend::Bearish,
            "stable" | "neutral" => Trend::Stable,
            _ => Trend::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Bullish => "bullish",
            Trend::Bearish => "bearish",
            Trend::Stable => "stable",
            Trend::Unknown => "unknown",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Trend::Bullish => "📈",
            Trend::Bearish => "📉",
            Trend::Stable => "➡️",
            Trend::Unknown => "❓",
        }
    }
}

impl Default for Trend {
    fn default() -> Self {
        Trend::Unknown
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A dated news-like item attached to a market summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    /// Provider-supplied date string ("Jan 18"); normalized dates live in
    /// the persistent news table, not here.
    #[serde(default)]
    pub date: String,
    pub headline: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub price_impact: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Structured market-summary record returned by the intelligence provider
/// (or reconstructed from cache tiers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSummary {
    /// Filled in by the caller; provider responses do not echo it.
    #[serde(default)]
    pub commodity: String,
    #[serde(default)]
    pub current_price: Option<String>,
    #[serde(default)]
    pub price_change: Option<String>,
    #[serde(default)]
    pub trend: Trend,
    #[serde(default)]
    pub key_drivers: Vec<String>,
    #[serde(default)]
    pub market_news: Vec<NewsItem>,
    #[serde(default)]
    pub price_outlook: String,
    #[serde(default)]
    pub source_urls: Vec<String>,
}

impl MarketSummary {
    pub fn empty(commodity: &str) -> Self {
        Self {
            commodity: commodity.to_string(),
            current_price: None,
            price_change: None,
            trend: Trend::Unknown,
            key_drivers: Vec::new(),
            market_news: Vec::new(),
            price_outlook: String::new(),
            source_urls: Vec::new(),
        }
    }
}

/// Which layer produced a record for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordOrigin {
    /// Served from the process-local memory tier.
    Memory,
    /// Point lookup hit in the persistent cache.
    PersistentCache,
    /// Assembled from historical intelligence/news within the lookback window.
    HistoricalFallback,
    /// Fresh provider query issued during this batch.
    FreshQuery,
    /// No AI commentary available; base price data only.
    NoData,
}

impl RecordOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordOrigin::Memory => "memory",
            RecordOrigin::PersistentCache => "cache",
            RecordOrigin::HistoricalFallback => "historical",
            RecordOrigin::FreshQuery => "fresh",
            RecordOrigin::NoData => "none",
        }
    }
}

/// Uniform per-commodity output of a batch resolution.
///
/// `data_date` is always the true origin date of the payload, never the
/// date the dashboard was rendered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelligenceRecord {
    pub commodity: String,
    pub origin: RecordOrigin,
    pub data_date: Option<NaiveDate>,
    pub summary: Option<MarketSummary>,
    /// Latest frequency-aware z-score, when computable.
    pub zscore: Option<f64>,
    pub below_threshold: bool,
    /// Set when the payload is older than its nominal TTL or served as an
    /// error fallback.
    pub stale: bool,
    pub warning: Option<String>,
}

impl IntelligenceRecord {
    pub fn no_data(commodity: &str) -> Self {
        Self {
            commodity: commodity.to_string(),
            origin: RecordOrigin::NoData,
            data_date: None,
            summary: None,
            zscore: None,
            below_threshold: false,
            stale: false,
            warning: None,
        }
    }

    pub fn has_commentary(&self) -> bool {
        self.summary.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_window_round_trips_through_serde() {
        let json = serde_json::to_string(&TimeWindow::Week).unwrap();
        assert_eq!(json, "\"1 week\"");
        let back: TimeWindow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TimeWindow::Week);
    }

    #[test]
    fn trend_parses_loosely() {
        assert_eq!(Trend::from_str_lossy("Bullish"), Trend::Bullish);
        assert_eq!(Trend::from_str_lossy("neutral"), Trend::Stable);
        assert_eq!(Trend::from_str_lossy("sideways"), Trend::Unknown);
    }

    #[test]
    fn time_window_parse_accepts_short_forms() {
        assert_eq!(TimeWindow::parse("1w"), Some(TimeWindow::Week));
        assert_eq!(TimeWindow::parse("1 month"), Some(TimeWindow::Month));
        assert_eq!(TimeWindow::parse("1 year"), None);
    }
}
