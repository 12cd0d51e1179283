// Frequency-aware rolling z-scores for commodity returns
//
// The rolling window counts native-period observations, not days: a 30-day
// window for daily series and a 30-week window for weekly series carry the
// same statistical power, so scores stay comparable across commodities of
// differing update cadence.

use crate::analytics::frequency::{detect_frequency, FrequencyClass};
use crate::errors::AnalyticsError;
use crate::models::PriceObservation;
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Outcome of a z-score computation for a single point.
///
/// `Insufficient` is distinct from a zero score on purpose: "no signal" and
/// "confirmed zero deviation" must never be conflated by callers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Signal {
    Score(f64),
    Insufficient,
}

impl Signal {
    /// Whether the signal clears the query threshold. Insufficient data is
    /// treated as exceeding: when uncertain, the conservative default is to
    /// allow a fresh query rather than suppress one.
    pub fn exceeds(&self, threshold: f64) -> bool {
        match self {
            Signal::Score(z) => z.abs() > threshold,
            Signal::Insufficient => true,
        }
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            Signal::Score(z) => Some(*z),
            Signal::Insufficient => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZScoreResult {
    pub as_of: NaiveDate,
    pub frequency: FrequencyClass,
    pub window: usize,
    pub observed_return: Option<f64>,
    pub rolling_mean: Option<f64>,
    pub rolling_stddev: Option<f64>,
    pub signal: Signal,
}

/// Display-only severity classes. Not consulted by the query gate, which
/// uses a single configurable threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Normal,
    Notice,
    Notable,
    Extreme,
}

#[derive(Debug, Clone, Copy)]
pub struct SeverityBands {
    pub notice: f64,
    pub notable: f64,
    pub extreme: f64,
}

impl Default for SeverityBands {
    fn default() -> Self {
        Self {
            notice: 1.0,
            notable: 2.0,
            extreme: 3.0,
        }
    }
}

impl SeverityBands {
    pub fn classify(&self, z: f64) -> Severity {
        let abs = z.abs();
        if abs >= self.extreme {
            Severity::Extreme
        } else if abs >= self.notable {
            Severity::Notable
        } else if abs >= self.notice {
            Severity::Notice
        } else {
            Severity::Normal
        }
    }
}

/// Z-score for the latest observation of a series.
///
/// Detects cadence over `lookback_days`, resamples weekly series to one
/// observation per week, then scores the newest return against trailing
/// `window`-observation rolling statistics. A zero rolling stddev yields a
/// score of exactly 0 (no deviation is possible without variance); fewer
/// than `window` returns yields `Signal::Insufficient`.
pub fn compute_frequency_aware_zscore(
    series: &[PriceObservation],
    lookback_days: i64,
    window: usize,
    daily_threshold: f64,
) -> Result<ZScoreResult, AnalyticsError> {
    let frequency = detect_frequency(series, lookback_days, daily_threshold)?;

    let resampled = match frequency {
        FrequencyClass::Weekly => resample_weekly(series),
        FrequencyClass::Daily => series.to_vec(),
    };
    let returns = period_returns(&resampled);

    // detect_frequency succeeded, so the series is non-empty.
    let as_of = match series.last() {
        Some(obs) => obs.date,
        None => {
            return Err(AnalyticsError::InsufficientData {
                required: 2,
                available: 0,
            })
        }
    };
    let Some(&(last_date, last_return)) = returns.last() else {
        return Ok(ZScoreResult {
            as_of,
            frequency,
            window,
            observed_return: None,
            rolling_mean: None,
            rolling_stddev: None,
            signal: Signal::Insufficient,
        });
    };

    if returns.len() < window {
        return Ok(ZScoreResult {
            as_of: last_date,
            frequency,
            window,
            observed_return: Some(last_return),
            rolling_mean: None,
            rolling_stddev: None,
            signal: Signal::Insufficient,
        });
    }

    Ok(score_at(&returns, returns.len() - 1, window, frequency))
}

/// Z-scores for every eligible point of a series, oldest first. Lazy: the
/// rolling statistics for each point are computed on demand.
pub fn zscore_history(
    series: &[PriceObservation],
    lookback_days: i64,
    window: usize,
    daily_threshold: f64,
) -> Result<impl Iterator<Item = ZScoreResult>, AnalyticsError> {
    let frequency = detect_frequency(series, lookback_days, daily_threshold)?;

    let resampled = match frequency {
        FrequencyClass::Weekly => resample_weekly(series),
        FrequencyClass::Daily => series.to_vec(),
    };
    let returns = period_returns(&resampled);

    let start = window.saturating_sub(1);
    let end = returns.len();
    Ok((start..end).map(move |t| score_at(&returns, t, window, frequency)))
}

// Score point t against the trailing window ending at t (inclusive; no
// look-ahead).
fn score_at(
    returns: &[(NaiveDate, f64)],
    t: usize,
    window: usize,
    frequency: FrequencyClass,
) -> ZScoreResult {
    let slice: Vec<f64> = returns[t + 1 - window..=t].iter().map(|&(_, r)| r).collect();
    let (date, observed) = returns[t];
    let mean = slice.iter().sum::<f64>() / slice.len() as f64;
    let stddev = sample_stddev(&slice, mean);

    let z = if stddev == 0.0 {
        0.0
    } else {
        (observed - mean) / stddev
    };

    ZScoreResult {
        as_of: date,
        frequency,
        window,
        observed_return: Some(observed),
        rolling_mean: Some(mean),
        rolling_stddev: Some(stddev),
        signal: Signal::Score(z),
    }
}

/// Period-over-period returns, skipping undefined changes from a zero base.
fn period_returns(series: &[PriceObservation]) -> Vec<(NaiveDate, f64)> {
    series
        .windows(2)
        .filter(|pair| pair[0].price != 0.0)
        .map(|pair| (pair[1].date, pair[1].price / pair[0].price - 1.0))
        .collect()
}

/// Collapse a daily-gridded series to one observation per Friday-ending
/// week, keeping the last value in each week (commodity markets close the
/// week on Friday).
fn resample_weekly(series: &[PriceObservation]) -> Vec<PriceObservation> {
    let mut out: Vec<PriceObservation> = Vec::new();
    for obs in series {
        let bucket = friday_on_or_after(obs.date);
        match out.last_mut() {
            Some(last) if friday_on_or_after(last.date) == bucket => {
                // Later observation in the same week wins.
                *last = *obs;
            }
            _ => out.push(*obs),
        }
    }
    out
}

fn friday_on_or_after(date: NaiveDate) -> NaiveDate {
    // Monday = 0 .. Sunday = 6; Friday = 4.
    let weekday = date.weekday().num_days_from_monday() as i64;
    let offset = (4 - weekday).rem_euclid(7);
    date + Duration::days(offset)
}

// Sample standard deviation (ddof = 1).
fn sample_stddev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daily_series(prices: &[f64]) -> Vec<PriceObservation> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(); // a Monday
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| PriceObservation::new(start + Duration::days(i as i64), p))
            .collect()
    }

    #[test]
    fn constant_series_scores_zero_not_error() {
        // 300 identical daily prices classify Weekly (no nonzero changes)
        // and still resample to enough weekly points for a full window.
        let series = daily_series(&vec![50.0; 300]);
        let result = compute_frequency_aware_zscore(&series, 90, 30, 0.5).unwrap();
        assert_eq!(result.frequency, FrequencyClass::Weekly);
        assert_eq!(result.signal, Signal::Score(0.0));
        assert_eq!(result.rolling_stddev, Some(0.0));
    }

    #[test]
    fn short_series_reports_insufficient() {
        let series = daily_series(&[100.0, 101.0, 102.0, 101.5, 103.0]);
        let result = compute_frequency_aware_zscore(&series, 90, 30, 0.5).unwrap();
        assert_eq!(result.signal, Signal::Insufficient);
        assert!(result.observed_return.is_some());
        assert!(result.rolling_mean.is_none());
    }

    #[test]
    fn spike_scores_high() {
        // 39 small alternating moves then a 10% jump.
        let mut prices: Vec<f64> = vec![100.0];
        for i in 1..40 {
            let step = if i % 2 == 0 { 0.1 } else { -0.1 };
            prices.push(prices[i - 1] + step);
        }
        let last = *prices.last().unwrap();
        prices.push(last * 1.10);

        let series = daily_series(&prices);
        let result = compute_frequency_aware_zscore(&series, 90, 30, 0.5).unwrap();
        assert_eq!(result.frequency, FrequencyClass::Daily);
        let z = result.signal.score().unwrap();
        assert!(z > 3.0, "expected extreme score, got {}", z);
    }

    #[test]
    fn weekly_series_is_resampled_before_scoring() {
        // 52 weeks of daily forward-fill: each week holds one value, the
        // value steps up on Mondays. At daily cadence only ~1/5 of changes
        // are nonzero, so this must classify Weekly and score weekly steps.
        let mut prices = Vec::new();
        for week in 0..52 {
            for _ in 0..5 {
                prices.push(100.0 + week as f64);
            }
        }
        let series: Vec<PriceObservation> = {
            let start = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
            let mut out = Vec::new();
            let mut d = start;
            for &p in &prices {
                // Skip weekends to mimic a business-day grid.
                while d.weekday().num_days_from_monday() >= 5 {
                    d += Duration::days(1);
                }
                out.push(PriceObservation::new(d, p));
                d += Duration::days(1);
            }
            out
        };

        let result = compute_frequency_aware_zscore(&series, 90, 30, 0.5).unwrap();
        assert_eq!(result.frequency, FrequencyClass::Weekly);
        // Weekly returns are ~1.0/price, all nonzero.
        let observed = result.observed_return.unwrap();
        assert!(observed > 0.0);
        assert!(matches!(result.signal, Signal::Score(_)));
    }

    #[test]
    fn history_yields_one_result_per_eligible_point() {
        let prices: Vec<f64> = (0..45).map(|i| 100.0 + ((i * 7) % 13) as f64).collect();
        let series = daily_series(&prices);
        let history: Vec<ZScoreResult> = zscore_history(&series, 90, 30, 0.5).unwrap().collect();
        // 44 returns, window 30 -> first eligible point is return index 29.
        assert_eq!(history.len(), 44 - 29);
        for result in &history {
            assert!(matches!(result.signal, Signal::Score(_)));
        }
    }

    #[test]
    fn no_lookahead_in_rolling_window() {
        // Flat history then a jump at the end: the jump must not leak into
        // earlier points' statistics.
        let mut prices: Vec<f64> = vec![100.0; 35];
        for i in 1..35 {
            prices[i] = prices[i - 1] * 1.001;
        }
        let mut spiked = prices.clone();
        let last = *spiked.last().unwrap();
        spiked.push(last * 1.2);

        let plain: Vec<ZScoreResult> =
            zscore_history(&daily_series(&prices), 90, 30, 0.5).unwrap().collect();
        let with_spike: Vec<ZScoreResult> =
            zscore_history(&daily_series(&spiked), 90, 30, 0.5).unwrap().collect();

        // Shared prefix scores identically.
        for (a, b) in plain.iter().zip(with_spike.iter()) {
            assert_eq!(a.signal, b.signal);
        }
    }

    #[test]
    fn insufficient_signal_exceeds_any_threshold() {
        assert!(Signal::Insufficient.exceeds(2.0));
        assert!(Signal::Score(4.0).exceeds(2.0));
        assert!(!Signal::Score(0.5).exceeds(2.0));
        assert!(Signal::Score(-3.0).exceeds(2.0));
    }

    #[test]
    fn severity_bands_classify() {
        let bands = SeverityBands::default();
        assert_eq!(bands.classify(0.4), Severity::Normal);
        assert_eq!(bands.classify(-1.2), Severity::Notice);
        assert_eq!(bands.classify(2.5), Severity::Notable);
        assert_eq!(bands.classify(-3.8), Severity::Extreme);
    }

    #[test]
    fn friday_bucketing() {
        let monday = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let friday = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let saturday = NaiveDate::from_ymd_opt(2025, 1, 11).unwrap();
        assert_eq!(friday_on_or_after(monday), friday);
        assert_eq!(friday_on_or_after(friday), friday);
        // Saturday rolls into the next week's bucket.
        assert_eq!(
            friday_on_or_after(saturday),
            NaiveDate::from_ymd_opt(2025, 1, 17).unwrap()
        );
    }
}
