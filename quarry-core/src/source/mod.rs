//! Market-data source trait and structured error types.
//!
//! `MarketDataSource` abstracts over where records come from (Yahoo Finance,
//! an in-memory script) so the ingestion engine can be driven offline in tests.
//! The storage layers sit above this trait; sources know nothing about them.

pub mod pacer;
pub mod scripted;
pub mod yahoo;

pub use pacer::Pacer;
pub use scripted::StaticSource;
pub use yahoo::{YahooOptions, YahooSource};

use crate::domain::{Interval, Record};
use chrono::NaiveDate;
use std::fmt;
use thiserror::Error;

/// How much history to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchRange {
    /// Everything the source has.
    EntireHistory,
    /// From the given date forward, inclusive.
    Since(NaiveDate),
}

impl FetchRange {
    pub fn start(&self) -> Option<NaiveDate> {
        match self {
            FetchRange::EntireHistory => None,
            FetchRange::Since(date) => Some(*date),
        }
    }
}

impl fmt::Display for FetchRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchRange::EntireHistory => write!(f, "max"),
            FetchRange::Since(date) => write!(f, "since {date}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by source (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("instrument not found: {instrument}")]
    InstrumentNotFound { instrument: String },

    #[error("source error: {0}")]
    Other(String),
}

/// A provider of historical records for single instruments.
pub trait MarketDataSource: Send + Sync {
    /// Stable identity. Also names the checkpoint ledger file.
    fn name(&self) -> &str;

    /// Fetch records for `instrument` over `range`.
    ///
    /// An empty vector is a valid answer (nothing new since the checkpoint).
    fn fetch_history(
        &self,
        instrument: &str,
        range: FetchRange,
        interval: Interval,
    ) -> Result<Vec<Record>, SourceError>;
}

impl<S: MarketDataSource + ?Sized> MarketDataSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch_history(
        &self,
        instrument: &str,
        range: FetchRange,
        interval: Interval,
    ) -> Result<Vec<Record>, SourceError> {
        (**self).fetch_history(instrument, range, interval)
    }
}
