// Update-cadence detection for commodity price series
//
// Providers forward-fill weekly series onto a daily grid; naive daily-return
// statistics on such a grid are dominated by zero-runs and understate real
// volatility. Detecting the cadence tells downstream statistics which grid
// the data actually lives on.

use crate::errors::AnalyticsError;
use crate::models::PriceObservation;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyClass {
    Daily,
    Weekly,
}

impl fmt::Display for FrequencyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrequencyClass::Daily => write!(f, "daily"),
            FrequencyClass::Weekly => write!(f, "weekly"),
        }
    }
}

/// Classify a price series as daily- or weekly-updating.
///
/// Looks at the `lookback_days` most recent observations (by date, so
/// irregular grids are handled) and measures the fraction of consecutive
/// changes that are nonzero. Strictly more than `daily_threshold` nonzero
/// classifies Daily; the boundary value itself classifies Weekly.
///
/// Fails with `InsufficientData` when fewer than 2 observations fall in the
/// window; callers fall back to a default class or skip the commodity.
pub fn detect_frequency(
    series: &[PriceObservation],
    lookback_days: i64,
    daily_threshold: f64,
) -> Result<FrequencyClass, AnalyticsError> {
    let windowed = restrict_to_lookback(series, lookback_days);

    if windowed.len() < 2 {
        return Err(AnalyticsError::InsufficientData {
            required: 2,
            available: windowed.len(),
        });
    }

    let mut total = 0usize;
    let mut nonzero = 0usize;
    for pair in windowed.windows(2) {
        let prev = pair[0].price;
        let curr = pair[1].price;
        if prev == 0.0 {
            // No meaningful percentage change from a zero base.
            continue;
        }
        total += 1;
        if curr != prev {
            nonzero += 1;
        }
    }

    if total == 0 {
        return Err(AnalyticsError::InsufficientData {
            required: 2,
            available: 1,
        });
    }

    let nonzero_fraction = nonzero as f64 / total as f64;
    if nonzero_fraction > daily_threshold {
        Ok(FrequencyClass::Daily)
    } else {
        Ok(FrequencyClass::Weekly)
    }
}

/// Most recent slice of the series within `lookback_days` of its last
/// observation.
pub(crate) fn restrict_to_lookback(
    series: &[PriceObservation],
    lookback_days: i64,
) -> &[PriceObservation] {
    let Some(last) = series.last() else {
        return series;
    };
    let start_date = last.date - Duration::days(lookback_days);
    let start = series.partition_point(|obs| obs.date < start_date);
    &series[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn daily_series(prices: &[f64]) -> Vec<PriceObservation> {
        let start = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| PriceObservation::new(start + Duration::days(i as i64), p))
            .collect()
    }

    #[test]
    fn forward_filled_series_is_weekly() {
        // One nonzero change out of four -> fraction 0.25
        let series = daily_series(&[100.0, 100.0, 100.0, 100.0, 105.0]);
        let class = detect_frequency(&series, 90, 0.5).unwrap();
        assert_eq!(class, FrequencyClass::Weekly);
    }

    #[test]
    fn actively_moving_series_is_daily() {
        let series = daily_series(&[100.0, 101.0, 99.5, 102.0, 103.0]);
        let class = detect_frequency(&series, 90, 0.5).unwrap();
        assert_eq!(class, FrequencyClass::Daily);
    }

    #[test]
    fn boundary_fraction_is_weekly() {
        // Exactly half the changes are nonzero: 2 of 4. The comparison is
        // strict, so the boundary value classifies Weekly.
        let series = daily_series(&[100.0, 100.0, 101.0, 101.0, 102.0]);
        let class = detect_frequency(&series, 90, 0.5).unwrap();
        assert_eq!(class, FrequencyClass::Weekly);
    }

    #[test]
    fn just_above_boundary_is_daily() {
        // 3 of 4 changes nonzero (0.75 > 0.5). An inclusive (>=) reading
        // would also accept the previous test's series; this one pins the
        // exclusive interpretation by contrast.
        let series = daily_series(&[100.0, 101.0, 102.0, 102.0, 103.0]);
        let class = detect_frequency(&series, 90, 0.5).unwrap();
        assert_eq!(class, FrequencyClass::Daily);
    }

    #[test]
    fn too_few_observations_is_an_error() {
        let series = daily_series(&[100.0]);
        let err = detect_frequency(&series, 90, 0.5).unwrap_err();
        assert!(matches!(err, AnalyticsError::InsufficientData { .. }));

        let empty: Vec<PriceObservation> = vec![];
        assert!(detect_frequency(&empty, 90, 0.5).is_err());
    }

    #[test]
    fn lookback_ignores_old_history() {
        // Volatile history a year ago, flat recent window -> Weekly.
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut series: Vec<PriceObservation> = (0..10)
            .map(|i| PriceObservation::new(start + Duration::days(i), 100.0 + i as f64))
            .collect();
        let recent_start = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        for i in 0..10 {
            series.push(PriceObservation::new(
                recent_start + Duration::days(i),
                200.0,
            ));
        }
        let class = detect_frequency(&series, 90, 0.5).unwrap();
        assert_eq!(class, FrequencyClass::Weekly);
    }
}
