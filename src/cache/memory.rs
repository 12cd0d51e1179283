// Process-local cache tier
//
// Owned by the running process and injected into the orchestrator; never a
// module-level global and never shared across processes. Entries are scoped
// to the data's as-of date: a request for a newer as-of date invalidates
// whatever was stored for an older one.

use crate::models::{MarketSummary, TimeWindow};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
struct MemoryEntry {
    as_of: NaiveDate,
    summary: MarketSummary,
}

/// Cache metrics for monitoring
#[derive(Debug, Clone, Default)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub inserts: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<(String, TimeWindow), MemoryEntry>>>,
    metrics: Arc<RwLock<CacheMetrics>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a summary for the given as-of date. An entry stored under an
    /// older as-of date is removed on sight: the underlying data has moved
    /// on, so the cached commentary no longer describes it.
    pub fn get(
        &self,
        commodity: &str,
        window: TimeWindow,
        as_of: NaiveDate,
    ) -> Option<(NaiveDate, MarketSummary)> {
        let key = (commodity.to_string(), window);
        let mut entries = self.entries.write().unwrap();

        match entries.get(&key) {
            Some(entry) if entry.as_of == as_of => {
                let mut metrics = self.metrics.write().unwrap();
                metrics.hits += 1;
                Some((entry.as_of, entry.summary.clone()))
            }
            Some(entry) if entry.as_of < as_of => {
                entries.remove(&key);
                let mut metrics = self.metrics.write().unwrap();
                metrics.misses += 1;
                metrics.expirations += 1;
                None
            }
            _ => {
                let mut metrics = self.metrics.write().unwrap();
                metrics.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, commodity: &str, window: TimeWindow, as_of: NaiveDate, summary: MarketSummary) {
        let mut entries = self.entries.write().unwrap();
        entries.insert((commodity.to_string(), window), MemoryEntry { as_of, summary });
        let mut metrics = self.metrics.write().unwrap();
        metrics.inserts += 1;
    }

    /// Explicit reset (date rollover, user-requested refresh).
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, d).unwrap()
    }

    #[test]
    fn hit_requires_matching_as_of_date() {
        let cache = MemoryCache::new();
        let summary = MarketSummary::empty("iron_ore");
        cache.put("iron_ore", TimeWindow::Week, day(19), summary);

        assert!(cache.get("iron_ore", TimeWindow::Week, day(19)).is_some());
        // Same commodity, different window: miss.
        assert!(cache.get("iron_ore", TimeWindow::Month, day(19)).is_none());
    }

    #[test]
    fn newer_as_of_date_invalidates_stale_entry() {
        let cache = MemoryCache::new();
        cache.put(
            "iron_ore",
            TimeWindow::Week,
            day(19),
            MarketSummary::empty("iron_ore"),
        );

        // Data rolled forward to the 22nd: the entry from the 19th is gone.
        assert!(cache.get("iron_ore", TimeWindow::Week, day(22)).is_none());
        assert_eq!(cache.len(), 0);

        let metrics = cache.metrics();
        assert_eq!(metrics.expirations, 1);
    }

    #[test]
    fn clear_empties_the_tier() {
        let cache = MemoryCache::new();
        cache.put(
            "coal",
            TimeWindow::Week,
            day(1),
            MarketSummary::empty("coal"),
        );
        cache.put(
            "steel",
            TimeWindow::Week,
            day(1),
            MarketSummary::empty("steel"),
        );
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn metrics_track_hits_and_misses() {
        let cache = MemoryCache::new();
        cache.put(
            "coal",
            TimeWindow::Week,
            day(5),
            MarketSummary::empty("coal"),
        );
        cache.get("coal", TimeWindow::Week, day(5));
        cache.get("zinc", TimeWindow::Week, day(5));

        let metrics = cache.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.inserts, 1);
        assert!((metrics.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
