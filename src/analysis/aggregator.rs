//! Window selection and reduction.
//!
//! This module reduces a raw series to a single value according to a
//! sensor's processing spec.
//!
//! # Clock injection
//! `aggregate_at` takes `now` explicitly so results are deterministic in
//! tests; `aggregate` is the wall-clock wrapper.

use crate::models::{ProcessingMode, ProcessingSpec, RawSeries, Reducer};
use chrono::{DateTime, Duration, Utc};

/// Width of a production bucket published by the metering provider.
pub const BUCKET_MINUTES: i64 = 5;

/// Reduce `series` using the real current time.
pub fn aggregate(series: &RawSeries, spec: &ProcessingSpec) -> f64 {
    aggregate_at(series, spec, Utc::now())
}

/// Reduce `series` as seen at `now`.
///
/// Empty windows yield `0.0` for every reducer.
pub fn aggregate_at(series: &RawSeries, spec: &ProcessingSpec, now: DateTime<Utc>) -> f64 {
    match spec.mode {
        ProcessingMode::Current => series.current.unwrap_or(0.0),
        ProcessingMode::Latest => latest_bucket(series, now, Duration::minutes(BUCKET_MINUTES)),
        _ => {
            let values = window_values(series, spec, now);
            reduce(&values, spec.mode.reducer())
        }
    }
}

/// Values whose timestamp lies in the spec's window, bounds included.
pub fn window_values(series: &RawSeries, spec: &ProcessingSpec, now: DateTime<Utc>) -> Vec<f64> {
    let (start, end) = spec.window(now);
    series
        .points
        .range(start..=end)
        .map(|(_, value)| *value)
        .collect()
}

/// Value of the bucket whose timestamp lies in `[now - width, now)`, or `0.0`.
pub fn latest_bucket(series: &RawSeries, now: DateTime<Utc>, width: Duration) -> f64 {
    series
        .points
        .range(now - width..now)
        .next_back()
        .map(|(_, value)| *value)
        .unwrap_or(0.0)
}

/// Apply a reducer to a set of values.
pub fn reduce(values: &[f64], reducer: Reducer) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    match reducer {
        Reducer::Sum => values.iter().sum(),
        Reducer::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Reducer::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        Reducer::Avg => values.iter().sum::<f64>() / values.len() as f64,
        Reducer::Identity => values[values.len() - 1],
    }
}
