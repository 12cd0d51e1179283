// Query gate: decides whether a commodity earns a fresh provider query.
//
// The gate only rations spend on fresh queries. It never decides what gets
// displayed: cached or historical data already in hand is always shown,
// whatever the anomaly score says.

use crate::analytics::Signal;

/// What the batch pipeline already found in the cache tiers for this
/// commodity before reaching the gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheState {
    /// Exact hit keyed by the current data date.
    pub point_hit: bool,
    /// Entry within the recent lookback window, possibly stale.
    pub recent_hit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Serve what the cache already holds.
    SkipUseCache,
    /// Market is quiet and nothing is cached; show nothing rather than
    /// spend a query on an unremarkable market.
    SkipNoData,
    /// Anomalous movement with nothing usable cached: spend a query.
    QueryFresh,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::SkipUseCache => "skip (cached)",
            Decision::SkipNoData => "skip (quiet market)",
            Decision::QueryFresh => "query",
        }
    }
}

/// Apply the gating policy for one commodity.
///
/// Anything cached wins outright. Otherwise a fresh query requires the
/// anomaly signal to exceed the threshold; a signal that could not be
/// computed counts as exceeding, since unknown conditions are exactly
/// when commentary is most wanted.
pub fn decide(signal: &Signal, threshold: f64, cache: CacheState) -> Decision {
    if cache.point_hit || cache.recent_hit {
        return Decision::SkipUseCache;
    }
    if signal.exceeds(threshold) {
        Decision::QueryFresh
    } else {
        Decision::SkipNoData
    }
}
