// Persistent cache tier backed by SQLite
//
// Shared across processes and sessions. All writes are upserts on the
// composite key (commodity, as_of_date, time_window): concurrent writers
// racing on the same key settle last-write-wins, which is safe because
// entries are idempotent recomputations of the same external fact.
//
// The as_of_date in a key is always the date the commodity's source data
// last changed, never the wall-clock date of the request. Keying by "today"
// would make every view on a later day a false miss and trigger redundant
// provider queries.

use crate::errors::CacheError;
use crate::models::{MarketSummary, NewsItem, TimeWindow, Trend};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

const DATE_FMT: &str = "%Y-%m-%d";
const MAX_NEWS_PER_COMMODITY: usize = 50;
const MAX_NEWS_PER_SAVE: usize = 20;

static PRICE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$?\s*([\d,]+\.?\d*)").unwrap());
static UNIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/(\w+)").unwrap());
static CHANGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([+-]?\d+\.?\d*)%").unwrap());

/// A cache row read back from the persistent tier.
#[derive(Debug, Clone)]
pub struct CachedPayload {
    pub summary: MarketSummary,
    pub as_of: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub hit_count: i64,
    /// Past its TTL. Point lookups never return expired rows; lookback
    /// reads do, flagged, so callers can display them dated.
    pub expired: bool,
}

/// Normalized projection row used by the historical-fallback path.
#[derive(Debug, Clone)]
pub struct HistoricalIntelligence {
    pub trend: Trend,
    pub key_drivers: Vec<String>,
    pub current_price: Option<f64>,
    pub price_unit: Option<String>,
    pub price_change_pct: Option<f64>,
    pub analysis_date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct StoredNewsItem {
    pub headline: String,
    pub summary: String,
    pub sources: Vec<String>,
    pub date: NaiveDate,
    pub sentiment: String,
}

#[derive(Debug, Clone)]
pub struct CacheStoreStats {
    pub cache_rows: usize,
    pub intelligence_rows: usize,
    pub news_rows: usize,
}

#[derive(Debug, Clone)]
pub struct PersistentCache {
    db: Arc<Mutex<Connection>>,
}

impl PersistentCache {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let db = Connection::open(path.as_ref()).map_err(|e| CacheError::Unavailable {
            reason: format!("Failed to open database: {}", e),
        })?;
        let cache = Self {
            db: Arc::new(Mutex::new(db)),
        };
        cache.create_tables()?;
        Ok(cache)
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        let db = Connection::open_in_memory().map_err(|e| CacheError::Unavailable {
            reason: format!("Failed to open in-memory database: {}", e),
        })?;
        let cache = Self {
            db: Arc::new(Mutex::new(db)),
        };
        cache.create_tables()?;
        Ok(cache)
    }

    fn create_tables(&self) -> Result<(), CacheError> {
        let db = self.db.lock().unwrap();

        db.execute(
            "CREATE TABLE IF NOT EXISTS query_cache (
                commodity TEXT NOT NULL,
                as_of_date TEXT NOT NULL,
                time_window TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                hit_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (commodity, as_of_date, time_window)
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS market_intelligence (
                commodity TEXT NOT NULL,
                analysis_date TEXT NOT NULL,
                trend TEXT NOT NULL,
                key_drivers TEXT NOT NULL,
                current_price REAL,
                price_unit TEXT,
                price_change_pct REAL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (commodity, analysis_date)
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS news_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                commodity TEXT NOT NULL,
                news_date TEXT NOT NULL,
                headline TEXT NOT NULL,
                summary TEXT NOT NULL,
                source_urls TEXT NOT NULL,
                sentiment TEXT NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_cache_commodity_date
             ON query_cache(commodity, as_of_date)",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_news_commodity_date
             ON news_items(commodity, news_date)",
            [],
        )?;

        Ok(())
    }

    /// Point lookup on the composite key. Expired rows count as absent.
    /// A hit increments the row's hit counter.
    pub fn read(
        &self,
        commodity: &str,
        as_of: NaiveDate,
        window: TimeWindow,
    ) -> Result<Option<CachedPayload>, CacheError> {
        let commodity = sanitize_name(commodity)?;
        let now = Utc::now().to_rfc3339();
        let as_of_str = as_of.format(DATE_FMT).to_string();

        let db = self.db.lock().unwrap();
        let result = db.query_row(
            "SELECT payload, created_at, hit_count
             FROM query_cache
             WHERE commodity = ?1 AND as_of_date = ?2 AND time_window = ?3
               AND expires_at > ?4",
            params![commodity, as_of_str, window.as_str(), now],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        );

        let (payload, created_at, hit_count) = match result {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(CacheError::Database(e)),
        };

        db.execute(
            "UPDATE query_cache SET hit_count = hit_count + 1
             WHERE commodity = ?1 AND as_of_date = ?2 AND time_window = ?3",
            params![commodity, as_of_str, window.as_str()],
        )?;

        let summary: MarketSummary = serde_json::from_str(&payload)?;
        Ok(Some(CachedPayload {
            summary,
            as_of,
            created_at: parse_timestamp(&created_at),
            hit_count: hit_count + 1,
            expired: false,
        }))
    }

    /// Upsert on the composite key: at most one row per key, a later write
    /// always supersedes the payload while the hit counter carries over.
    pub fn write(
        &self,
        commodity: &str,
        as_of: NaiveDate,
        window: TimeWindow,
        summary: &MarketSummary,
        ttl_hours: i64,
    ) -> Result<(), CacheError> {
        let commodity = sanitize_name(commodity)?;
        let payload = serde_json::to_string(summary)?;
        let created_at = Utc::now();
        let expires_at = created_at + Duration::hours(ttl_hours);

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO query_cache
                (commodity, as_of_date, time_window, payload, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(commodity, as_of_date, time_window) DO UPDATE SET
                payload = excluded.payload,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at",
            params![
                commodity,
                as_of.format(DATE_FMT).to_string(),
                window.as_str(),
                payload,
                created_at.to_rfc3339(),
                expires_at.to_rfc3339()
            ],
        )?;

        log::debug!("Cached {} ({}) as of {}", commodity, window, as_of);
        Ok(())
    }

    /// Freshest entry for the commodity within `lookback_days`, regardless
    /// of exact as-of date. Expired-but-within-lookback rows are eligible
    /// and returned flagged stale: aging commentary still beats none, it
    /// just has to be displayed dated.
    pub fn read_recent(
        &self,
        commodity: &str,
        window: TimeWindow,
        lookback_days: i64,
    ) -> Result<Option<CachedPayload>, CacheError> {
        let commodity = sanitize_name(commodity)?;
        let cutoff = (Utc::now().date_naive() - Duration::days(lookback_days))
            .format(DATE_FMT)
            .to_string();
        let now = Utc::now().to_rfc3339();

        let db = self.db.lock().unwrap();
        let result = db.query_row(
            "SELECT payload, created_at, hit_count, as_of_date, expires_at
             FROM query_cache
             WHERE commodity = ?1 AND time_window = ?2 AND as_of_date >= ?3
             ORDER BY as_of_date DESC
             LIMIT 1",
            params![commodity, window.as_str(), cutoff],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        );

        let (payload, created_at, hit_count, as_of_str, expires_at) = match result {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(CacheError::Database(e)),
        };

        let summary: MarketSummary = serde_json::from_str(&payload)?;
        let as_of = NaiveDate::parse_from_str(&as_of_str, DATE_FMT)
            .unwrap_or_else(|_| Utc::now().date_naive());
        Ok(Some(CachedPayload {
            summary,
            as_of,
            created_at: parse_timestamp(&created_at),
            hit_count,
            expired: expires_at <= now,
        }))
    }

    /// Periodic sweep: drop rows past their expiry and rows older than the
    /// retention horizon (a hard outer bound independent of per-row TTL).
    /// Returns the number of rows removed.
    pub fn sweep_expired(&self, retention_days: i64) -> Result<usize, CacheError> {
        let now = Utc::now();
        let horizon = (now - Duration::days(retention_days)).to_rfc3339();

        let db = self.db.lock().unwrap();
        let removed = db.execute(
            "DELETE FROM query_cache WHERE expires_at <= ?1 OR created_at < ?2",
            params![now.to_rfc3339(), horizon],
        )?;
        let old_intel = db.execute(
            "DELETE FROM market_intelligence WHERE created_at < ?1",
            params![horizon],
        )?;

        if removed + old_intel > 0 {
            log::debug!(
                "Swept {} cache rows and {} intelligence rows",
                removed,
                old_intel
            );
        }
        Ok(removed)
    }

    /// Persist the normalized intelligence projection used by the
    /// lookback-fallback path. Price and change are parsed out of the
    /// provider's display strings ("USD 105.30/ton", "+2.5%").
    pub fn save_intelligence(
        &self,
        commodity: &str,
        analysis_date: NaiveDate,
        summary: &MarketSummary,
    ) -> Result<(), CacheError> {
        let commodity = sanitize_name(commodity)?;
        let key_drivers = serde_json::to_string(&summary.key_drivers)?;

        let (current_price, price_unit) = summary
            .current_price
            .as_deref()
            .map(parse_price)
            .unwrap_or((None, None));
        let price_change_pct = summary.price_change.as_deref().and_then(parse_change_pct);

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO market_intelligence
                (commodity, analysis_date, trend, key_drivers,
                 current_price, price_unit, price_change_pct, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(commodity, analysis_date) DO UPDATE SET
                trend = excluded.trend,
                key_drivers = excluded.key_drivers,
                current_price = excluded.current_price,
                price_unit = excluded.price_unit,
                price_change_pct = excluded.price_change_pct",
            params![
                commodity,
                analysis_date.format(DATE_FMT).to_string(),
                summary.trend.as_str(),
                key_drivers,
                current_price,
                price_unit,
                price_change_pct,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Most recent intelligence projection within `lookback_days`.
    pub fn recent_intelligence(
        &self,
        commodity: &str,
        lookback_days: i64,
    ) -> Result<Option<HistoricalIntelligence>, CacheError> {
        let commodity = sanitize_name(commodity)?;
        let cutoff = (Utc::now().date_naive() - Duration::days(lookback_days))
            .format(DATE_FMT)
            .to_string();

        let db = self.db.lock().unwrap();
        let result = db.query_row(
            "SELECT trend, key_drivers, current_price, price_unit, price_change_pct, analysis_date
             FROM market_intelligence
             WHERE commodity = ?1 AND analysis_date >= ?2
             ORDER BY analysis_date DESC, created_at DESC
             LIMIT 1",
            params![commodity, cutoff],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        );

        let (trend, drivers, price, unit, change, date) = match result {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(CacheError::Database(e)),
        };

        Ok(Some(HistoricalIntelligence {
            trend: Trend::from_str_lossy(&trend),
            key_drivers: serde_json::from_str(&drivers).unwrap_or_default(),
            current_price: price,
            price_unit: unit,
            price_change_pct: change,
            analysis_date: NaiveDate::parse_from_str(&date, DATE_FMT)
                .unwrap_or_else(|_| Utc::now().date_naive()),
        }))
    }

    /// Append news items for a commodity, then trim to the most recent 50
    /// rows so the table stays bounded.
    pub fn save_news(
        &self,
        commodity: &str,
        news_date: NaiveDate,
        items: &[NewsItem],
    ) -> Result<(), CacheError> {
        if items.is_empty() {
            return Ok(());
        }
        let commodity = sanitize_name(commodity)?;
        let date_str = news_date.format(DATE_FMT).to_string();

        let db = self.db.lock().unwrap();
        for item in items.iter().take(MAX_NEWS_PER_SAVE) {
            let sources = serde_json::to_string(&item.sources)?;
            let sentiment = match (&item.price_impact, &item.category) {
                (Some(impact), Some(category)) => format!("{}/{}", impact, category),
                (Some(impact), None) => impact.clone(),
                _ => "neutral".to_string(),
            };
            db.execute(
                "INSERT INTO news_items
                    (commodity, news_date, headline, summary, source_urls, sentiment)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    commodity,
                    date_str,
                    truncate(&item.headline, 500),
                    truncate(&item.details, 1000),
                    sources,
                    truncate(&sentiment, 20)
                ],
            )?;
        }

        db.execute(
            "DELETE FROM news_items
             WHERE commodity = ?1
               AND id NOT IN (
                   SELECT id FROM news_items
                   WHERE commodity = ?1
                   ORDER BY news_date DESC, id DESC
                   LIMIT ?2
               )",
            params![commodity, MAX_NEWS_PER_COMMODITY as i64],
        )?;

        log::debug!("Saved {} news items for {}", items.len().min(MAX_NEWS_PER_SAVE), commodity);
        Ok(())
    }

    /// News for one commodity within the lookback window, newest first.
    pub fn recent_news(
        &self,
        commodity: &str,
        lookback_days: i64,
    ) -> Result<Vec<StoredNewsItem>, CacheError> {
        let commodity = sanitize_name(commodity)?;
        let cutoff = (Utc::now().date_naive() - Duration::days(lookback_days))
            .format(DATE_FMT)
            .to_string();

        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT headline, summary, source_urls, news_date, sentiment
             FROM news_items
             WHERE commodity = ?1 AND news_date >= ?2
             ORDER BY news_date DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![commodity, cutoff], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (headline, summary, sources, date, sentiment) = row?;
            items.push(StoredNewsItem {
                headline,
                summary,
                sources: serde_json::from_str(&sources).unwrap_or_default(),
                date: NaiveDate::parse_from_str(&date, DATE_FMT)
                    .unwrap_or_else(|_| Utc::now().date_naive()),
                sentiment,
            });
        }
        Ok(items)
    }

    /// Batch form of `recent_news`: one query for many commodities, much
    /// cheaper than per-commodity round trips on a large dashboard.
    pub fn recent_news_batch(
        &self,
        commodities: &[String],
        lookback_days: i64,
    ) -> Result<HashMap<String, Vec<StoredNewsItem>>, CacheError> {
        let mut out: HashMap<String, Vec<StoredNewsItem>> = HashMap::new();
        if commodities.is_empty() {
            return Ok(out);
        }
        for name in commodities {
            out.insert(name.clone(), Vec::new());
        }

        let cutoff = (Utc::now().date_naive() - Duration::days(lookback_days))
            .format(DATE_FMT)
            .to_string();
        let placeholders: Vec<String> = (0..commodities.len())
            .map(|i| format!("?{}", i + 2))
            .collect();
        let sql = format!(
            "SELECT commodity, headline, summary, source_urls, news_date, sentiment
             FROM news_items
             WHERE news_date >= ?1 AND commodity IN ({})
             ORDER BY commodity, news_date DESC, id DESC",
            placeholders.join(", ")
        );

        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&sql)?;
        let mut query_params: Vec<&dyn rusqlite::ToSql> = vec![&cutoff];
        for name in commodities {
            query_params.push(name);
        }
        let rows = stmt.query_map(query_params.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        for row in rows {
            let (commodity, headline, summary, sources, date, sentiment) = row?;
            let item = StoredNewsItem {
                headline,
                summary,
                sources: serde_json::from_str(&sources).unwrap_or_default(),
                date: NaiveDate::parse_from_str(&date, DATE_FMT)
                    .unwrap_or_else(|_| Utc::now().date_naive()),
                sentiment,
            };
            out.entry(commodity).or_default().push(item);
        }
        Ok(out)
    }

    /// Clear cached query rows, for one commodity or everything.
    pub fn clear(&self, commodity: Option<&str>) -> Result<usize, CacheError> {
        let db = self.db.lock().unwrap();
        let removed = match commodity {
            Some(name) => {
                let name = sanitize_name(name)?;
                db.execute("DELETE FROM query_cache WHERE commodity = ?1", params![name])?
            }
            None => db.execute("DELETE FROM query_cache", [])?,
        };
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStoreStats, CacheError> {
        let db = self.db.lock().unwrap();
        let cache_rows: i64 =
            db.query_row("SELECT COUNT(*) FROM query_cache", [], |row| row.get(0))?;
        let intelligence_rows: i64 =
            db.query_row("SELECT COUNT(*) FROM market_intelligence", [], |row| row.get(0))?;
        let news_rows: i64 =
            db.query_row("SELECT COUNT(*) FROM news_items", [], |row| row.get(0))?;
        Ok(CacheStoreStats {
            cache_rows: cache_rows as usize,
            intelligence_rows: intelligence_rows as usize,
            news_rows: news_rows as usize,
        })
    }
}

/// Commodity names come from config and database metadata; keep them to a
/// conservative charset and length before they touch SQL or log lines.
fn sanitize_name(name: &str) -> Result<String, CacheError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CacheError::InvalidName {
            name: name.to_string(),
            reason: "empty".to_string(),
        });
    }
    if name.len() > 50 {
        return Err(CacheError::InvalidName {
            name: name.to_string(),
            reason: "longer than 50 characters".to_string(),
        });
    }
    let ok = name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '(' | ')'));
    if !ok {
        return Err(CacheError::InvalidName {
            name: name.to_string(),
            reason: "contains forbidden characters".to_string(),
        });
    }
    Ok(name.to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// "USD 105.30/ton" -> (105.30, "USD/ton"); "$430/ton" -> (430.0, "USD/ton")
fn parse_price(s: &str) -> (Option<f64>, Option<String>) {
    let price = PRICE_RE
        .captures(s)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().replace(',', "").parse::<f64>().ok());
    let unit = UNIT_RE
        .captures(s)
        .and_then(|c| c.get(1))
        .map(|m| format!("USD/{}", m.as_str()));
    (price, unit)
}

/// "+2.5%" -> 2.5, "-0.8%" -> -0.8
fn parse_change_pct(s: &str) -> Option<f64> {
    CHANGE_RE
        .captures(s)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, d).unwrap()
    }

    fn summary_with_price(commodity: &str, price: &str) -> MarketSummary {
        let mut summary = MarketSummary::empty(commodity);
        summary.current_price = Some(price.to_string());
        summary.trend = Trend::Bullish;
        summary.key_drivers = vec!["supply disruption".to_string()];
        summary
    }

    #[test]
    fn point_lookup_hits_on_data_date_not_query_date() {
        let cache = PersistentCache::open_in_memory().unwrap();
        let summary = summary_with_price("iron_ore", "USD 115/ton");

        // Written on the data's last-updated date.
        cache
            .write("iron_ore", day(19), TimeWindow::Week, &summary, 24)
            .unwrap();

        // Days later, a read keyed by the same data date still hits...
        let hit = cache.read("iron_ore", day(19), TimeWindow::Week).unwrap();
        assert!(hit.is_some());

        // ...while a read keyed by a wall-clock "today" misses. This is the
        // false-miss bug the key model exists to prevent.
        let miss = cache.read("iron_ore", day(22), TimeWindow::Week).unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn upsert_keeps_one_row_and_last_payload_wins() {
        let cache = PersistentCache::open_in_memory().unwrap();
        let first = summary_with_price("coal", "USD 100/ton");
        let second = summary_with_price("coal", "USD 140/ton");

        cache.write("coal", day(1), TimeWindow::Week, &first, 24).unwrap();
        cache.write("coal", day(1), TimeWindow::Week, &second, 24).unwrap();

        assert_eq!(cache.stats().unwrap().cache_rows, 1);
        let hit = cache.read("coal", day(1), TimeWindow::Week).unwrap().unwrap();
        assert_eq!(hit.summary.current_price.as_deref(), Some("USD 140/ton"));
    }

    #[test]
    fn hit_count_increments_on_read() {
        let cache = PersistentCache::open_in_memory().unwrap();
        cache
            .write("zinc", day(5), TimeWindow::Week, &MarketSummary::empty("zinc"), 24)
            .unwrap();

        let first = cache.read("zinc", day(5), TimeWindow::Week).unwrap().unwrap();
        assert_eq!(first.hit_count, 1);
        let second = cache.read("zinc", day(5), TimeWindow::Week).unwrap().unwrap();
        assert_eq!(second.hit_count, 2);
    }

    #[test]
    fn expired_rows_are_absent_for_point_lookups() {
        let cache = PersistentCache::open_in_memory().unwrap();
        // Negative TTL: already expired at write time.
        cache
            .write("nickel", day(5), TimeWindow::Week, &MarketSummary::empty("nickel"), -1)
            .unwrap();
        assert!(cache.read("nickel", day(5), TimeWindow::Week).unwrap().is_none());
    }

    #[test]
    fn recent_read_returns_expired_rows_flagged_stale() {
        let cache = PersistentCache::open_in_memory().unwrap();
        let as_of = Utc::now().date_naive() - Duration::days(3);
        cache
            .write("nickel", as_of, TimeWindow::Week, &MarketSummary::empty("nickel"), -1)
            .unwrap();

        let recent = cache.recent("nickel");
        let payload = recent.unwrap();
        assert!(payload.expired);
        assert_eq!(payload.as_of, as_of);
    }

    impl PersistentCache {
        // Test helper: recent read with the reference 7-day lookback.
        fn recent(&self, commodity: &str) -> Option<CachedPayload> {
            self.read_recent(commodity, TimeWindow::Week, 7).unwrap()
        }
    }

    #[test]
    fn recent_read_prefers_newest_entry() {
        let cache = PersistentCache::open_in_memory().unwrap();
        let today = Utc::now().date_naive();
        cache
            .write(
                "steel",
                today - Duration::days(5),
                TimeWindow::Week,
                &summary_with_price("steel", "USD 500/ton"),
                24,
            )
            .unwrap();
        cache
            .write(
                "steel",
                today - Duration::days(2),
                TimeWindow::Week,
                &summary_with_price("steel", "USD 520/ton"),
                24,
            )
            .unwrap();

        let payload = cache.recent("steel").unwrap();
        assert_eq!(payload.summary.current_price.as_deref(), Some("USD 520/ton"));
        assert!(!payload.expired);
    }

    #[test]
    fn recent_read_respects_lookback_horizon() {
        let cache = PersistentCache::open_in_memory().unwrap();
        let today = Utc::now().date_naive();
        cache
            .write(
                "tin",
                today - Duration::days(12),
                TimeWindow::Week,
                &MarketSummary::empty("tin"),
                24,
            )
            .unwrap();
        assert!(cache.recent("tin").is_none());
    }

    #[test]
    fn sweep_removes_expired_rows() {
        let cache = PersistentCache::open_in_memory().unwrap();
        cache
            .write("a", day(1), TimeWindow::Week, &MarketSummary::empty("a"), -1)
            .unwrap();
        cache
            .write("b", day(1), TimeWindow::Week, &MarketSummary::empty("b"), 24)
            .unwrap();

        let removed = cache.sweep_expired(30).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.stats().unwrap().cache_rows, 1);
    }

    #[test]
    fn intelligence_projection_round_trips_with_parsed_price() {
        let cache = PersistentCache::open_in_memory().unwrap();
        let mut summary = summary_with_price("iron_ore", "USD 105.30/ton");
        summary.price_change = Some("+2.5%".to_string());
        let as_of = Utc::now().date_naive() - Duration::days(2);

        cache.save_intelligence("iron_ore", as_of, &summary).unwrap();
        let intel = cache.recent_intelligence("iron_ore", 7).unwrap().unwrap();

        assert_eq!(intel.trend, Trend::Bullish);
        assert_eq!(intel.current_price, Some(105.30));
        assert_eq!(intel.price_unit.as_deref(), Some("USD/ton"));
        assert_eq!(intel.price_change_pct, Some(2.5));
        assert_eq!(intel.analysis_date, as_of);
        assert_eq!(intel.key_drivers, vec!["supply disruption".to_string()]);
    }

    #[test]
    fn news_table_trims_to_bounded_size() {
        let cache = PersistentCache::open_in_memory().unwrap();
        let today = Utc::now().date_naive();
        let batch: Vec<NewsItem> = (0..20)
            .map(|i| NewsItem {
                date: String::new(),
                headline: format!("headline {}", i),
                details: "details".to_string(),
                category: Some("supply".to_string()),
                price_impact: Some("bullish".to_string()),
                sources: vec![],
            })
            .collect();

        for offset in 0..4 {
            cache
                .save_news("iron_ore", today - Duration::days(offset), &batch)
                .unwrap();
        }
        assert_eq!(cache.stats().unwrap().news_rows, MAX_NEWS_PER_COMMODITY);

        let items = cache.recent_news("iron_ore", 7).unwrap();
        assert_eq!(items.len(), MAX_NEWS_PER_COMMODITY);
        assert_eq!(items[0].sentiment, "bullish/supply");
    }

    #[test]
    fn batch_news_groups_by_commodity() {
        let cache = PersistentCache::open_in_memory().unwrap();
        let today = Utc::now().date_naive();
        let item = |headline: &str| NewsItem {
            date: String::new(),
            headline: headline.to_string(),
            details: String::new(),
            category: None,
            price_impact: None,
            sources: vec!["https://example.com/a".to_string()],
        };

        cache.save_news("coal", today, &[item("coal news")]).unwrap();
        cache.save_news("zinc", today, &[item("zinc news")]).unwrap();

        let names = vec!["coal".to_string(), "zinc".to_string(), "tin".to_string()];
        let grouped = cache.recent_news_batch(&names, 7).unwrap();
        assert_eq!(grouped["coal"].len(), 1);
        assert_eq!(grouped["zinc"].len(), 1);
        assert!(grouped["tin"].is_empty());
        assert_eq!(grouped["coal"][0].sources, vec!["https://example.com/a"]);
    }

    #[test]
    fn clear_scopes_to_one_commodity() {
        let cache = PersistentCache::open_in_memory().unwrap();
        cache
            .write("a", day(1), TimeWindow::Week, &MarketSummary::empty("a"), 24)
            .unwrap();
        cache
            .write("b", day(1), TimeWindow::Week, &MarketSummary::empty("b"), 24)
            .unwrap();

        assert_eq!(cache.clear(Some("a")).unwrap(), 1);
        assert_eq!(cache.stats().unwrap().cache_rows, 1);
        assert_eq!(cache.clear(None).unwrap(), 1);
    }

    #[test]
    fn names_are_validated() {
        let cache = PersistentCache::open_in_memory().unwrap();
        let err = cache.read("bad; DROP TABLE", day(1), TimeWindow::Week);
        assert!(matches!(err, Err(CacheError::InvalidName { .. })));
        // Regional variants with parentheses are legitimate.
        assert!(cache.read("Rice (US)", day(1), TimeWindow::Week).unwrap().is_none());
    }

    #[test]
    fn price_parsing_variants() {
        assert_eq!(parse_price("USD 1,150.50/ton"), (Some(1150.50), Some("USD/ton".into())));
        assert_eq!(parse_price("$430/ton").0, Some(430.0));
        assert_eq!(parse_change_pct("-0.8%"), Some(-0.8));
        assert_eq!(parse_change_pct("flat"), None);
    }
}
