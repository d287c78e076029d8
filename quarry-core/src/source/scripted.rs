//! In-memory scripted source for offline runs and tests.

use super::{FetchRange, MarketDataSource, SourceError};
use crate::domain::{Interval, Record};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Serves fixed per-instrument rows, filtered by the requested range.
///
/// Instruments without rows return an empty history. Instruments marked with
/// [`StaticSource::fail_on`] return `SourceError::Other`.
#[derive(Debug, Default)]
pub struct StaticSource {
    name: String,
    rows: Mutex<HashMap<String, Vec<Record>>>,
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<(String, FetchRange)>>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_rows(self, instrument: &str, rows: Vec<Record>) -> Self {
        self.set_rows(instrument, rows);
        self
    }

    /// Replace the rows served for `instrument`.
    pub fn set_rows(&self, instrument: &str, rows: Vec<Record>) {
        if let Ok(mut map) = self.rows.lock() {
            map.insert(instrument.to_string(), rows);
        }
    }

    pub fn fail_on(self, instrument: &str) -> Self {
        if let Ok(mut set) = self.failing.lock() {
            set.insert(instrument.to_string());
        }
        self
    }

    pub fn heal(&self, instrument: &str) {
        if let Ok(mut set) = self.failing.lock() {
            set.remove(instrument);
        }
    }

    /// Number of `fetch_history` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request made, in order.
    pub fn requests(&self) -> Vec<(String, FetchRange)> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl MarketDataSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_history(
        &self,
        instrument: &str,
        range: FetchRange,
        _interval: Interval,
    ) -> Result<Vec<Record>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((instrument.to_string(), range));
        }

        let failing = self
            .failing
            .lock()
            .map(|set| set.contains(instrument))
            .unwrap_or(false);
        if failing {
            return Err(SourceError::Other(format!("scripted failure for {instrument}")));
        }

        let rows = self
            .rows
            .lock()
            .map_err(|_| SourceError::Other("rows lock poisoned".into()))?
            .get(instrument)
            .cloned()
            .unwrap_or_default();

        Ok(match range {
            FetchRange::EntireHistory => rows,
            FetchRange::Since(start) => rows.into_iter().filter(|r| r.date >= start).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn since_filters_inclusively() {
        let source = StaticSource::new("static").with_rows(
            "X",
            vec![Record::empty(day(1), "X"), Record::empty(day(2), "X"), Record::empty(day(3), "X")],
        );
        let rows = source
            .fetch_history("X", FetchRange::Since(day(2)), Interval::Day)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(source.calls(), 1);
        assert_eq!(source.requests(), vec![("X".to_string(), FetchRange::Since(day(2)))]);
    }

    #[test]
    fn unknown_instrument_is_empty() {
        let source = StaticSource::new("static");
        let rows = source
            .fetch_history("NOPE", FetchRange::EntireHistory, Interval::Day)
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn scripted_failure_can_heal() {
        let source = StaticSource::new("static").fail_on("X");
        assert!(source
            .fetch_history("X", FetchRange::EntireHistory, Interval::Day)
            .is_err());
        source.heal("X");
        assert!(source
            .fetch_history("X", FetchRange::EntireHistory, Interval::Day)
            .is_ok());
    }
}
