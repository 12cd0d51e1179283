// Parsing of provider chat completions into a MarketSummary.
//
// The prompt asks for structured JSON, but models drift: the JSON may sit
// inside prose or a code fence, or follow an older schema with flat string
// news. Three layers run in order: direct JSON, embedded JSON, then a text
// scrape that salvages price, change, and trend from free prose. Only when
// all three produce nothing does parsing fail, and the caller treats that
// commodity as having no data.

use crate::errors::ProviderError;
use crate::models::{MarketSummary, NewsItem, Trend};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

static TEXT_PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:USD|\$)\s*([\d,]+\.?\d*)(/\w+)?").unwrap());
static TEXT_CHANGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([+-]?\d+\.?\d*)%").unwrap());

/// Older schema some responses still follow: flat strings instead of
/// structured news objects.
#[derive(Debug, Deserialize)]
struct LegacySummary {
    #[serde(default)]
    current_price: Option<String>,
    #[serde(default)]
    price_change: Option<String>,
    #[serde(default)]
    trend: Option<String>,
    #[serde(default)]
    key_drivers: Vec<String>,
    #[serde(default)]
    recent_news: Vec<String>,
    #[serde(default)]
    price_outlook: Option<String>,
    #[serde(default)]
    source_urls: Vec<String>,
}

pub fn parse_summary(commodity: &str, content: &str) -> Result<MarketSummary, ProviderError> {
    if let Some(summary) = parse_json_candidate(commodity, content.trim()) {
        return Ok(summary);
    }
    if let Some(block) = extract_json_block(content) {
        if let Some(summary) = parse_json_candidate(commodity, &block) {
            return Ok(summary);
        }
    }
    if let Some(summary) = scrape_text(commodity, content) {
        log::warn!("Fell back to text extraction for {}", commodity);
        return Ok(summary);
    }
    Err(ProviderError::MalformedResponse {
        detail: format!(
            "no parseable summary for {} in {} bytes of response",
            commodity,
            content.len()
        ),
    })
}

fn parse_json_candidate(commodity: &str, candidate: &str) -> Option<MarketSummary> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    if !value.is_object() {
        return None;
    }

    // Structured schema carries market_news objects; its absence means the
    // legacy shape.
    if value.get("market_news").is_some() {
        let mut summary: MarketSummary = serde_json::from_value(value).ok()?;
        summary.commodity = commodity.to_string();
        return Some(summary);
    }

    let legacy: LegacySummary = serde_json::from_value(value).ok()?;
    let mut summary = MarketSummary::empty(commodity);
    summary.current_price = legacy.current_price;
    summary.price_change = legacy.price_change;
    summary.trend = legacy
        .trend
        .as_deref()
        .map(Trend::from_str_lossy)
        .unwrap_or_default();
    summary.key_drivers = legacy.key_drivers;
    summary.price_outlook = legacy.price_outlook.unwrap_or_default();
    summary.source_urls = legacy.source_urls;
    summary.market_news = legacy
        .recent_news
        .into_iter()
        .map(|headline| NewsItem {
            date: String::new(),
            headline,
            details: String::new(),
            category: None,
            price_impact: None,
            sources: vec![],
        })
        .collect();
    Some(summary)
}

/// First balanced top-level `{...}` block in the content. Handles JSON
/// embedded in prose or code fences without a full parse.
fn extract_json_block(content: &str) -> Option<String> {
    let start = content.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in content[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(content[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Last-resort scrape of free prose. Requires at least a price or a
/// percentage change; pure filler text yields nothing.
fn scrape_text(commodity: &str, content: &str) -> Option<MarketSummary> {
    let price = TEXT_PRICE_RE.captures(content).map(|c| {
        let amount = c.get(1).map(|m| m.as_str()).unwrap_or_default();
        let unit = c.get(2).map(|m| m.as_str()).unwrap_or_default();
        format!("USD {}{}", amount, unit)
    });
    let change = TEXT_CHANGE_RE
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| format!("{}%", m.as_str()));

    if price.is_none() && change.is_none() {
        return None;
    }

    let lower = content.to_lowercase();
    let trend = if lower.contains("bullish") || lower.contains("rising") {
        Trend::Bullish
    } else if lower.contains("bearish") || lower.contains("falling") {
        Trend::Bearish
    } else if lower.contains("stable") || lower.contains("steady") {
        Trend::Stable
    } else {
        Trend::Unknown
    };

    let mut summary = MarketSummary::empty(commodity);
    summary.current_price = price;
    summary.price_change = change;
    summary.trend = trend;
    Some(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_json_parses_directly() {
        let content = r#"{
            "current_price": "USD 115.20/ton",
            "price_change": "+3.1%",
            "trend": "bullish",
            "key_drivers": ["port congestion", "restocking demand"],
            "market_news": [
                {"headline": "Mills restock ahead of quota reset",
                 "details": "Inventories drawn down",
                 "category": "demand",
                 "price_impact": "bullish"}
            ],
            "price_outlook": "Firm into next quarter",
            "source_urls": ["https://example.com/report"]
        }"#;

        let summary = parse_summary("iron_ore", content).unwrap();
        assert_eq!(summary.commodity, "iron_ore");
        assert_eq!(summary.current_price.as_deref(), Some("USD 115.20/ton"));
        assert_eq!(summary.trend, Trend::Bullish);
        assert_eq!(summary.market_news.len(), 1);
        assert_eq!(summary.market_news[0].category.as_deref(), Some("demand"));
    }

    #[test]
    fn json_inside_code_fence_is_extracted() {
        let content = "Here is the analysis you asked for:\n```json\n\
            {\"current_price\": \"USD 430/ton\", \"trend\": \"stable\", \
             \"recent_news\": [\"Spot market quiet\"]}\n```\nLet me know.";

        let summary = parse_summary("coal", content).unwrap();
        assert_eq!(summary.current_price.as_deref(), Some("USD 430/ton"));
        assert_eq!(summary.trend, Trend::Stable);
        assert_eq!(summary.market_news[0].headline, "Spot market quiet");
    }

    #[test]
    fn legacy_flat_news_becomes_headlines() {
        let content = r#"{"current_price": "USD 2,100/ton",
            "price_change": "-1.2%",
            "trend": "bearish",
            "key_drivers": ["weak demand"],
            "recent_news": ["Smelters cut output", "Inventory builds"]}"#;

        let summary = parse_summary("aluminium", content).unwrap();
        assert_eq!(summary.market_news.len(), 2);
        assert!(summary.market_news[0].details.is_empty());
        assert_eq!(summary.key_drivers, vec!["weak demand"]);
    }

    #[test]
    fn prose_falls_back_to_text_extraction() {
        let content = "Zinc is trading around USD 2,850/ton, up +1.4% on the \
                       week. Sentiment remains bullish on smelter outages.";

        let summary = parse_summary("zinc", content).unwrap();
        assert_eq!(summary.current_price.as_deref(), Some("USD 2,850/ton"));
        assert_eq!(summary.price_change.as_deref(), Some("+1.4%"));
        assert_eq!(summary.trend, Trend::Bullish);
    }

    #[test]
    fn contentless_prose_is_an_error() {
        let err = parse_summary("tin", "I could not find reliable market data.");
        assert!(matches!(err, Err(ProviderError::MalformedResponse { .. })));
    }

    #[test]
    fn balanced_brace_scan_ignores_braces_in_strings() {
        let content = r#"note {"current_price": "USD 10/kg {spot}", "trend": "stable"} end"#;
        let block = extract_json_block(content).unwrap();
        assert!(block.ends_with("\"stable\"}"));
        let summary = parse_summary("cobalt", content).unwrap();
        assert_eq!(summary.current_price.as_deref(), Some("USD 10/kg {spot}"));
    }
}
