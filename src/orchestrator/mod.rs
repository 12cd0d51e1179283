// Batch resolution pipeline.
//
// For each commodity: check the memory tier, then the persistent tier on
// the exact as-of date, then the recent-lookback window, and only then let
// the query gate decide whether the anomaly score justifies spending a
// fresh provider query. Fresh queries run concurrently under a semaphore
// and a batch deadline; one commodity failing never poisons the rest.

use crate::analytics::{compute_frequency_aware_zscore, Signal};
use crate::cache::{
    CachedPayload, HistoricalIntelligence, MemoryCache, PersistentCache, StoredNewsItem,
};
use crate::config::Config;
use crate::errors::CacheError;
use crate::gate::{self, CacheState, Decision};
use crate::models::{
    IntelligenceRecord, MarketSummary, NewsItem, PriceObservation, RecordOrigin, TimeWindow,
};
use crate::provider::IntelligenceProvider;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// One commodity's input to a batch: its name and price history, oldest
/// observation first.
#[derive(Debug, Clone)]
pub struct SubjectInput {
    pub name: String,
    pub series: Vec<PriceObservation>,
}

enum Triage {
    Ready(IntelligenceRecord),
    Query {
        as_of: NaiveDate,
        zscore: Option<f64>,
        below_threshold: bool,
    },
}

pub struct Orchestrator {
    memory: Arc<MemoryCache>,
    persistent: Option<Arc<PersistentCache>>,
    provider: Arc<dyn IntelligenceProvider>,
    config: Config,
}

impl Orchestrator {
    /// Standard construction: opens the persistent tier at the configured
    /// path. A tier that fails to open degrades the pipeline to memory
    /// only rather than failing it.
    pub fn new(provider: Arc<dyn IntelligenceProvider>, config: Config) -> Self {
        let persistent = match PersistentCache::open(&config.cache.database_path) {
            Ok(cache) => Some(Arc::new(cache)),
            Err(err) => {
                log::warn!("Persistent cache unavailable, continuing without it: {}", err);
                None
            }
        };
        Self {
            memory: Arc::new(MemoryCache::new()),
            persistent,
            provider,
            config,
        }
    }

    pub fn with_tiers(
        memory: Arc<MemoryCache>,
        persistent: Option<Arc<PersistentCache>>,
        provider: Arc<dyn IntelligenceProvider>,
        config: Config,
    ) -> Self {
        Self {
            memory,
            persistent,
            provider,
            config,
        }
    }

    pub fn memory(&self) -> &MemoryCache {
        &self.memory
    }

    pub fn persistent(&self) -> Option<&PersistentCache> {
        self.persistent.as_deref()
    }

    /// Resolve a batch of commodities into display records. Always returns
    /// one record per input subject.
    pub async fn resolve_batch(
        &self,
        subjects: &[SubjectInput],
        window: TimeWindow,
        force_refresh: bool,
    ) -> HashMap<String, IntelligenceRecord> {
        let news = self.prefetch_news(subjects);
        let mut records: HashMap<String, IntelligenceRecord> = HashMap::new();
        let mut pending: Vec<(String, NaiveDate, Option<f64>, bool)> = Vec::new();

        for subject in subjects {
            match self.triage(subject, window, force_refresh, &news) {
                Triage::Ready(record) => {
                    records.insert(subject.name.clone(), record);
                }
                Triage::Query {
                    as_of,
                    zscore,
                    below_threshold,
                } => pending.push((subject.name.clone(), as_of, zscore, below_threshold)),
            }
        }

        if !pending.is_empty() {
            log::info!(
                "Querying provider for {} of {} commodities",
                pending.len(),
                subjects.len()
            );
            let fresh = self.run_queries(pending, window, &news).await;
            records.extend(fresh);
        }

        records
    }

    /// One query loads the lookback news for the whole batch; the
    /// per-commodity fallback paths read from this map instead of issuing
    /// their own round trips.
    fn prefetch_news(&self, subjects: &[SubjectInput]) -> HashMap<String, Vec<StoredNewsItem>> {
        let Some(persistent) = self.persistent.as_deref() else {
            return HashMap::new();
        };
        let names: Vec<String> = subjects.iter().map(|s| s.name.clone()).collect();
        match persistent.recent_news_batch(&names, self.config.cache.recent_lookback_days) {
            Ok(map) => map,
            Err(err) => {
                log::warn!("Batch news prefetch failed: {}", err);
                HashMap::new()
            }
        }
    }

    /// Cache-tier walk and gate decision for one commodity, no I/O beyond
    /// the local tiers.
    fn triage(
        &self,
        subject: &SubjectInput,
        window: TimeWindow,
        force_refresh: bool,
        news: &HashMap<String, Vec<StoredNewsItem>>,
    ) -> Triage {
        let name = subject.name.as_str();

        let as_of = match subject.series.last() {
            Some(obs) => obs.date,
            None => {
                let mut record = IntelligenceRecord::no_data(name);
                record.warning = Some("no price history available".to_string());
                return Triage::Ready(record);
            }
        };

        let threshold = self.config.analytics.zscore_threshold;
        let (signal, zscore) = match compute_frequency_aware_zscore(
            &subject.series,
            self.config.analytics.frequency_lookback_days,
            self.config.analytics.rolling_window,
            self.config.analytics.daily_threshold,
        ) {
            Ok(result) => {
                let score = result.signal.score();
                (result.signal, score)
            }
            Err(err) => {
                log::debug!("No anomaly score for {}: {}", name, err);
                (Signal::Insufficient, None)
            }
        };
        let below_threshold = !signal.exceeds(threshold);

        // An explicit refresh distrusts only the process-local tier; an
        // entry in the shared persistent tier for the same data date was
        // written by an equally fresh query and still ends resolution.
        if !force_refresh {
            if let Some((date, summary)) = self.memory.get(name, window, as_of) {
                return Triage::Ready(IntelligenceRecord {
                    commodity: name.to_string(),
                    origin: RecordOrigin::Memory,
                    data_date: Some(date),
                    summary: Some(summary),
                    zscore,
                    below_threshold,
                    stale: false,
                    warning: None,
                });
            }
        }

        let Some(persistent) = self.persistent.as_deref() else {
            return self.gate_or_query(name, as_of, signal, zscore, below_threshold, force_refresh);
        };

        match persistent.read(name, as_of, window) {
            Ok(Some(payload)) => {
                self.memory
                    .put(name, window, payload.as_of, payload.summary.clone());
                return Triage::Ready(record_from_payload(
                    name,
                    RecordOrigin::PersistentCache,
                    payload,
                    zscore,
                    below_threshold,
                ));
            }
            Ok(None) => {}
            Err(err) => log::warn!("Cache read failed for {}, treating as miss: {}", name, err),
        }

        match persistent.read_recent(name, window, self.config.cache.recent_lookback_days) {
            Ok(Some(payload)) => {
                let mut record = record_from_payload(
                    name,
                    RecordOrigin::HistoricalFallback,
                    payload,
                    zscore,
                    below_threshold,
                );
                record.stale = true;
                if let Some(date) = record.data_date {
                    record.warning = Some(format!("showing analysis from {}", date));
                }
                return Triage::Ready(record);
            }
            Ok(None) => {}
            Err(err) => log::warn!("Lookback read failed for {}, treating as miss: {}", name, err),
        }

        // The cached payload is gone, but the normalized projection tables
        // may still hold recent intelligence worth showing dated.
        if let Some(record) = self.projection_record(persistent, name, zscore, below_threshold, news)
        {
            return Triage::Ready(record);
        }

        self.gate_or_query(name, as_of, signal, zscore, below_threshold, force_refresh)
    }

    /// Best-available record assembled from the intelligence and news
    /// projections when no cached payload survives the lookback.
    fn projection_record(
        &self,
        persistent: &PersistentCache,
        name: &str,
        zscore: Option<f64>,
        below_threshold: bool,
        news: &HashMap<String, Vec<StoredNewsItem>>,
    ) -> Option<IntelligenceRecord> {
        match persistent.recent_intelligence(name, self.config.cache.recent_lookback_days) {
            Ok(Some(intel)) => {
                let date = intel.analysis_date;
                let items = news.get(name).map(Vec::as_slice).unwrap_or(&[]);
                let summary =
                    summary_from_history(name, intel, items, self.config.batch.max_news_items);
                Some(IntelligenceRecord {
                    commodity: name.to_string(),
                    origin: RecordOrigin::HistoricalFallback,
                    data_date: Some(date),
                    summary: Some(summary),
                    zscore,
                    below_threshold,
                    stale: true,
                    warning: Some(format!("showing analysis from {}", date)),
                })
            }
            Ok(None) => None,
            Err(err) => {
                log::warn!("Projection read failed for {}: {}", name, err);
                None
            }
        }
    }

    fn gate_or_query(
        &self,
        name: &str,
        as_of: NaiveDate,
        signal: Signal,
        zscore: Option<f64>,
        below_threshold: bool,
        force_refresh: bool,
    ) -> Triage {
        // A forced refresh that found nothing cached queries regardless of
        // the anomaly score.
        if force_refresh {
            return Triage::Query {
                as_of,
                zscore,
                below_threshold,
            };
        }
        let threshold = self.config.analytics.zscore_threshold;
        let decision = gate::decide(&signal, threshold, CacheState::default());
        match decision {
            Decision::QueryFresh => Triage::Query {
                as_of,
                zscore,
                below_threshold,
            },
            Decision::SkipUseCache | Decision::SkipNoData => {
                log::debug!("Skipping {}: {}", name, decision.as_str());
                let mut record = IntelligenceRecord::no_data(name);
                record.data_date = Some(as_of);
                record.zscore = zscore;
                record.below_threshold = below_threshold;
                Triage::Ready(record)
            }
        }
    }

    /// Run the fresh queries concurrently under the configured parallelism
    /// cap and batch deadline.
    async fn run_queries(
        &self,
        pending: Vec<(String, NaiveDate, Option<f64>, bool)>,
        window: TimeWindow,
        news: &HashMap<String, Vec<StoredNewsItem>>,
    ) -> HashMap<String, IntelligenceRecord> {
        let semaphore = Arc::new(Semaphore::new(self.config.batch.max_concurrent_queries));
        let deadline = Duration::from_secs(self.config.batch.batch_timeout_secs);
        let mut join_set: JoinSet<(String, NaiveDate, Option<f64>, bool, Result<MarketSummary, String>)> =
            JoinSet::new();

        let mut waiting: HashMap<String, (NaiveDate, Option<f64>, bool)> = HashMap::new();
        for (name, as_of, zscore, below_threshold) in pending {
            waiting.insert(name.clone(), (as_of, zscore, below_threshold));
            let semaphore = Arc::clone(&semaphore);
            let provider = Arc::clone(&self.provider);
            join_set.spawn(async move {
                // Closed only if the set is aborted, at which point the
                // result is discarded anyway.
                let _permit = semaphore.acquire().await;
                let outcome = provider
                    .fetch(&name, window)
                    .await
                    .map_err(|e| e.to_string());
                (name, as_of, zscore, below_threshold, outcome)
            });
        }

        let mut records = HashMap::new();
        let sleep = tokio::time::sleep(deadline);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                joined = join_set.join_next() => {
                    let Some(joined) = joined else { break };
                    let Ok((name, as_of, zscore, below_threshold, outcome)) = joined else {
                        continue;
                    };
                    waiting.remove(&name);
                    let record = match outcome {
                        Ok(summary) => {
                            self.commit_fresh(&name, as_of, window, summary, zscore, below_threshold)
                        }
                        Err(reason) => {
                            log::warn!("Provider query failed for {}: {}", name, reason);
                            self.degraded_record(&name, window, zscore, below_threshold, reason, news)
                        }
                    };
                    records.insert(name, record);
                }
                _ = &mut sleep => {
                    log::warn!("Batch deadline hit with {} queries outstanding", waiting.len());
                    join_set.abort_all();
                    break;
                }
            }
        }

        // Whatever did not finish still gets a record.
        for (name, (_, zscore, below_threshold)) in waiting {
            let record = self.degraded_record(
                &name,
                window,
                zscore,
                below_threshold,
                "batch deadline exceeded".to_string(),
                news,
            );
            records.insert(name, record);
        }
        records
    }

    /// Write a fresh summary through both cache tiers and build its record.
    /// Cache write failures degrade to warnings; the data is still served.
    fn commit_fresh(
        &self,
        name: &str,
        as_of: NaiveDate,
        window: TimeWindow,
        mut summary: MarketSummary,
        zscore: Option<f64>,
        below_threshold: bool,
    ) -> IntelligenceRecord {
        summary.commodity = name.to_string();
        summary.market_news.truncate(self.config.batch.max_news_items);

        if let Some(persistent) = self.persistent.as_deref() {
            if let Err(err) = self.write_through(persistent, name, as_of, window, &summary) {
                log::warn!("Cache write failed for {}: {}", name, err);
            }
        }
        self.memory.put(name, window, as_of, summary.clone());

        IntelligenceRecord {
            commodity: name.to_string(),
            origin: RecordOrigin::FreshQuery,
            data_date: Some(as_of),
            summary: Some(summary),
            zscore,
            below_threshold,
            stale: false,
            warning: None,
        }
    }

    fn write_through(
        &self,
        persistent: &PersistentCache,
        name: &str,
        as_of: NaiveDate,
        window: TimeWindow,
        summary: &MarketSummary,
    ) -> Result<(), CacheError> {
        persistent.write(name, as_of, window, summary, self.config.cache.ttl_hours)?;
        persistent.save_intelligence(name, as_of, summary)?;
        persistent.save_news(name, as_of, &summary.market_news)?;
        Ok(())
    }

    /// Provider failed: serve the best historical projection on hand, or an
    /// explicit no-data record. Either way the failure stays contained to
    /// this commodity.
    fn degraded_record(
        &self,
        name: &str,
        window: TimeWindow,
        zscore: Option<f64>,
        below_threshold: bool,
        reason: String,
        news: &HashMap<String, Vec<StoredNewsItem>>,
    ) -> IntelligenceRecord {
        let lookback = self.config.cache.recent_lookback_days;
        if let Some(persistent) = self.persistent.as_deref() {
            match persistent.read_recent(name, window, lookback) {
                Ok(Some(payload)) => {
                    let mut record = record_from_payload(
                        name,
                        RecordOrigin::HistoricalFallback,
                        payload,
                        zscore,
                        below_threshold,
                    );
                    record.stale = true;
                    record.warning = Some(format!("live query failed ({}), showing cached analysis", reason));
                    return record;
                }
                Ok(None) => {}
                Err(err) => log::warn!("Fallback read failed for {}: {}", name, err),
            }

            // No cached payload; the projection tables may still hold
            // enough for a minimal summary.
            if let Some(mut record) =
                self.projection_record(persistent, name, zscore, below_threshold, news)
            {
                if let Some(date) = record.data_date {
                    record.warning = Some(format!(
                        "live query failed ({}), showing analysis from {}",
                        reason, date
                    ));
                }
                return record;
            }
        }

        let mut record = IntelligenceRecord::no_data(name);
        record.zscore = zscore;
        record.below_threshold = below_threshold;
        record.warning = Some(format!("live query failed: {}", reason));
        record
    }
}

fn record_from_payload(
    name: &str,
    origin: RecordOrigin,
    payload: CachedPayload,
    zscore: Option<f64>,
    below_threshold: bool,
) -> IntelligenceRecord {
    IntelligenceRecord {
        commodity: name.to_string(),
        origin,
        data_date: Some(payload.as_of),
        summary: Some(payload.summary),
        zscore,
        below_threshold,
        stale: payload.expired,
        warning: None,
    }
}

fn summary_from_history(
    name: &str,
    intel: HistoricalIntelligence,
    news: &[StoredNewsItem],
    max_news: usize,
) -> MarketSummary {
    let mut summary = MarketSummary::empty(name);
    summary.trend = intel.trend;
    summary.key_drivers = intel.key_drivers;
    summary.current_price = intel.current_price.map(|price| {
        let unit = intel.price_unit.as_deref().unwrap_or("USD");
        format!("{} {:.2}", unit, price)
    });
    summary.price_change = intel.price_change_pct.map(|pct| format!("{:+.1}%", pct));
    summary.market_news = news
        .iter()
        .take(max_news)
        .map(|item| NewsItem {
            date: item.date.format("%b %d").to_string(),
            headline: item.headline.clone(),
            details: item.summary.clone(),
            category: None,
            price_impact: Some(item.sentiment.clone()),
            sources: item.sources.clone(),
        })
        .collect();
    summary
}
