//! Upsert merge keyed on (Date, Instrument).
//!
//! The curated series is rebuilt by folding snapshots into an `UpsertMerge`
//! oldest-to-newest. On key collision the incoming record's present fields win
//! and gaps are filled from the running result; keys missing from the incoming
//! snapshot are kept untouched. Output is ordered by (Date, Instrument).

use crate::domain::{Record, RecordKey};
use std::collections::BTreeMap;

/// Counts from applying one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
}

/// Running merge state.
#[derive(Debug, Clone, Default)]
pub struct UpsertMerge {
    rows: BTreeMap<RecordKey, Record>,
}

impl UpsertMerge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the merge with an existing series (usually the latest curated
    /// snapshot).
    pub fn from_records(records: Vec<Record>) -> Self {
        let mut merge = Self::new();
        merge.apply(records);
        merge
    }

    /// Upsert one snapshot. Rows later in `incoming` win over earlier rows
    /// with the same key.
    pub fn apply(&mut self, incoming: Vec<Record>) -> MergeStats {
        let mut stats = MergeStats::default();
        for record in incoming {
            let key = record.key();
            match self.rows.remove(&key) {
                Some(existing) => {
                    self.rows.insert(key, record.combine_first(&existing));
                    stats.updated += 1;
                }
                None => {
                    self.rows.insert(key, record);
                    stats.inserted += 1;
                }
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &RecordKey) -> Option<&Record> {
        self.rows.get(key)
    }

    pub fn into_records(self) -> Vec<Record> {
        self.rows.into_values().collect()
    }
}

/// Fold `snapshots` (oldest first) over `base`.
pub fn upsert_fold<I>(base: Vec<Record>, snapshots: I) -> Vec<Record>
where
    I: IntoIterator<Item = Vec<Record>>,
{
    let mut merge = UpsertMerge::from_records(base);
    for snapshot in snapshots {
        merge.apply(snapshot);
    }
    merge.into_records()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn rec(d: u32, instrument: &str, close: Option<f64>) -> Record {
        let mut r = Record::empty(NaiveDate::from_ymd_opt(2024, 1, d).unwrap(), instrument);
        r.close = close;
        r
    }

    #[test]
    fn incoming_wins_on_collision() {
        let curated = vec![rec(2, "X", Some(10.0))];
        let raw = vec![rec(2, "X", Some(11.0))];
        let merged = upsert_fold(curated, vec![raw]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].close, Some(11.0));
    }

    #[test]
    fn keys_absent_from_incoming_survive() {
        let curated = vec![rec(2, "X", Some(10.0)), rec(3, "X", Some(10.5))];
        let raw = vec![rec(3, "X", Some(12.0)), rec(4, "X", Some(13.0))];
        let merged = upsert_fold(curated, vec![raw]);
        let closes: Vec<_> = merged.iter().map(|r| r.close).collect();
        assert_eq!(closes, vec![Some(10.0), Some(12.0), Some(13.0)]);
    }

    #[test]
    fn missing_field_does_not_erase_history() {
        let curated = vec![rec(2, "X", Some(10.0))];
        let raw = vec![rec(2, "X", None)];
        let merged = upsert_fold(curated, vec![raw]);
        assert_eq!(merged[0].close, Some(10.0));
    }

    #[test]
    fn newest_snapshot_wins_across_fold() {
        let older = vec![rec(2, "X", Some(1.0))];
        let newer = vec![rec(2, "X", Some(2.0))];
        let merged = upsert_fold(Vec::new(), vec![older, newer]);
        assert_eq!(merged[0].close, Some(2.0));
    }

    #[test]
    fn same_date_different_instruments_are_distinct() {
        let raw = vec![rec(2, "X", Some(1.0)), rec(2, "Y", Some(2.0))];
        let mut merge = UpsertMerge::new();
        let stats = merge.apply(raw);
        assert_eq!(stats, MergeStats { inserted: 2, updated: 0 });
        assert_eq!(merge.len(), 2);
    }

    #[test]
    fn output_sorted_by_date_then_instrument() {
        let raw = vec![rec(5, "B", None), rec(2, "Z", None), rec(5, "A", None)];
        let merged = upsert_fold(Vec::new(), vec![raw]);
        let keys: Vec<_> = merged
            .iter()
            .map(|r| (r.date.format("%d").to_string(), r.instrument.clone()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("02".to_string(), "Z".to_string()),
                ("05".to_string(), "A".to_string()),
                ("05".to_string(), "B".to_string()),
            ]
        );
    }
}
