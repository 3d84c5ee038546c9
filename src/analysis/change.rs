//! Change detection on raw fetches.
//!
//! Providers republish the same payload across many polling ticks. Only a
//! fetch that differs structurally from the last accepted one is notified.
//! The comparison is on the raw payload, not on the aggregated value.

use crate::models::RawSeries;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// `true` unless `current` is structurally identical to `previous`.
pub fn changed(previous: Option<&RawSeries>, current: &RawSeries) -> bool {
    match previous {
        Some(previous) => previous != current,
        None => true,
    }
}

/// Last accepted snapshot per sensor.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last: Mutex<HashMap<String, RawSeries>>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare against the stored snapshot and replace it when different.
    ///
    /// Returns whether the series counts as a change.
    pub async fn observe(&self, sensor: &str, series: &RawSeries) -> bool {
        let mut last = self.last.lock().await;
        if !changed(last.get(sensor), series) {
            return false;
        }
        last.insert(sensor.to_string(), series.clone());
        true
    }

    /// Copy of the last accepted snapshot for a sensor.
    #[cfg(test)]
    pub async fn snapshot(&self, sensor: &str) -> Option<RawSeries> {
        self.last.lock().await.get(sensor).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn series(values: &[(u32, f64)]) -> RawSeries {
        values
            .iter()
            .map(|(minute, v)| (Utc.with_ymd_and_hms(2024, 5, 1, 12, *minute, 0).unwrap(), *v))
            .collect()
    }

    #[test]
    fn test_none_is_always_changed() {
        assert!(changed(None, &RawSeries::new()));
        assert!(changed(None, &series(&[(0, 1.0)])));
    }

    #[test]
    fn test_identical_series_unchanged() {
        let a = series(&[(0, 1.0), (5, 2.0)]);
        let b = series(&[(5, 2.0), (0, 1.0)]);
        assert!(!changed(Some(&a), &b));
    }

    #[test]
    fn test_any_key_or_value_difference_is_a_change() {
        let base = series(&[(0, 1.0), (5, 2.0)]);
        assert!(changed(Some(&base), &series(&[(0, 1.0), (5, 2.5)])));
        assert!(changed(Some(&base), &series(&[(0, 1.0), (10, 2.0)])));
        assert!(changed(Some(&base), &series(&[(0, 1.0)])));
        assert!(changed(Some(&base), &base.clone().with_current(3.0)));
    }

    #[tokio::test]
    async fn test_observe_replaces_snapshot_only_on_change() {
        let detector = ChangeDetector::new();
        let first = series(&[(0, 1.0)]);
        let second = series(&[(0, 1.0), (5, 4.0)]);

        assert!(detector.observe("pv", &first).await);
        assert!(!detector.observe("pv", &first).await);
        assert!(detector.observe("pv", &second).await);
        assert_eq!(detector.snapshot("pv").await, Some(second));

        // Snapshots are tracked per sensor.
        assert!(detector.observe("other", &first).await);
    }
}
