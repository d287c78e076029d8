//! Record: one dated row of an instrument's series.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Natural key of a record within the curated layer.
pub type RecordKey = (NaiveDate, String);

/// Daily (or weekly/monthly) price row for one instrument.
///
/// Every value field is optional: sources leave gaps, and the curation merge
/// fills a missing field from older history instead of erasing it.
/// `dividends` and `stock_splits` are corporate-action annotations, not prices.
///
/// Serde names follow the column headers used in every snapshot encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Open")]
    pub open: Option<f64>,
    #[serde(rename = "High")]
    pub high: Option<f64>,
    #[serde(rename = "Low")]
    pub low: Option<f64>,
    #[serde(rename = "Close")]
    pub close: Option<f64>,
    #[serde(rename = "Volume")]
    pub volume: Option<u64>,
    #[serde(rename = "Dividends")]
    pub dividends: Option<f64>,
    #[serde(rename = "Stock Splits")]
    pub stock_splits: Option<f64>,
    #[serde(rename = "Instrument", alias = "Ticker")]
    pub instrument: String,
}

impl Record {
    /// A record with only its key set.
    pub fn empty(date: NaiveDate, instrument: impl Into<String>) -> Self {
        Self {
            date,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
            dividends: None,
            stock_splits: None,
            instrument: instrument.into(),
        }
    }

    pub fn key(&self) -> RecordKey {
        (self.date, self.instrument.clone())
    }

    /// Field-level combine: values present on `self` win, gaps are filled from
    /// `older`. Both records must share a key.
    pub fn combine_first(self, older: &Record) -> Record {
        debug_assert_eq!(self.date, older.date);
        Record {
            date: self.date,
            open: self.open.or(older.open),
            high: self.high.or(older.high),
            low: self.low.or(older.low),
            close: self.close.or(older.close),
            volume: self.volume.or(older.volume),
            dividends: self.dividends.or(older.dividends),
            stock_splits: self.stock_splits.or(older.stock_splits),
            instrument: self.instrument,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn combine_prefers_newer_values() {
        let mut older = Record::empty(day(2), "X");
        older.close = Some(10.0);
        older.volume = Some(500);

        let mut newer = Record::empty(day(2), "X");
        newer.close = Some(11.0);

        let merged = newer.combine_first(&older);
        assert_eq!(merged.close, Some(11.0));
        assert_eq!(merged.volume, Some(500), "gap filled from older record");
        assert_eq!(merged.open, None);
    }

    #[test]
    fn key_is_date_and_instrument() {
        let r = Record::empty(day(3), "AAPL");
        assert_eq!(r.key(), (day(3), "AAPL".to_string()));
    }
}
